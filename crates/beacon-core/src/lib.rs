//! beacon-core: Shared types, configuration and errors for the beacon
//!
//! This crate describes the worker being advertised to the scheduler and
//! the configuration the beacon agent runs with. It has no knowledge of
//! the SSH transport.

pub mod config;
pub mod error;
pub mod types;

pub use error::{BeaconError, ConfigError, EndpointError};
pub use types::{RegistrationMode, Worker, WILDCARD_BIND_HOST};
