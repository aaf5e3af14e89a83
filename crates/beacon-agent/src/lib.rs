//! beacon-agent: Registers a worker with the scheduler
//!
//! The beacon dials the scheduler's SSH gateway, starts the registration
//! command for the worker, forwards the worker's garden and baggageclaim
//! ports through the tunnel and keeps the connection alive until it is
//! told to stop or the remote side goes away.

pub mod beacon;
pub mod shutdown;
pub mod ssh;
pub mod traits;

pub use beacon::{Beacon, Lifecycle};
pub use traits::{Client, Closeable, KeepAlive, Session};
