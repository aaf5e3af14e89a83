//! Capability traits the beacon drives

mod client;
mod session;

pub use client::{Client, Closeable, KeepAlive};
pub use session::Session;
