//! SSH implementation of the beacon's client
//!
//! Talks to the scheduler's SSH gateway: sessions are exec channels,
//! forwards are remote `tcpip-forward` requests, and the keep-alive monitor
//! watches the connection russh keeps alive.

mod client;
mod keepalive;
mod session;

pub use client::{SshClient, SshClientError, SshConnection};
pub use session::SshSession;
