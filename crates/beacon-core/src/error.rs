//! Core error types for the beacon

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a registration attempt
///
/// Message-carrying variants display the underlying message verbatim, so
/// callers can match on the exact text produced by the transport or the
/// remote side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    /// Dialing the transport connection failed
    #[error("{0}")]
    Dial(String),

    /// Opening a session on the connection failed
    #[error("{0}")]
    Session(String),

    /// The remote side rejected the command
    #[error("{0}")]
    Start(String),

    /// Setting up a port forward failed
    #[error("{0}")]
    Proxy(String),

    /// The keep-alive monitor detected a dead connection
    #[error("{0}")]
    KeepAlive(String),

    /// Waiting for the remote command failed
    #[error("{0}")]
    Wait(String),

    /// The remote command exited with a non-zero status
    #[error("remote command exited with status {0}")]
    ExitStatus(u32),

    /// Releasing the connection or session failed
    #[error("{0}")]
    Close(String),

    /// A worker endpoint could not be interpreted
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Errors interpreting a worker endpoint address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The address has no `host:port` form
    #[error("invalid address {0:?}: expected host:port")]
    InvalidAddress(String),

    /// The port is missing or not a valid number
    #[error("invalid port in address {0:?}")]
    InvalidPort(String),

    /// The URL could not be parsed
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_verbatim() {
        assert_eq!(BeaconError::Wait("fail".into()).to_string(), "fail");
        assert_eq!(
            BeaconError::KeepAlive("keepalive fail".into()).to_string(),
            "keepalive fail"
        );
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(
            BeaconError::ExitStatus(2).to_string(),
            "remote command exited with status 2"
        );
    }

    #[test]
    fn test_endpoint_error_is_transparent() {
        let err: BeaconError = EndpointError::InvalidPort("host:abc".into()).into();
        assert_eq!(err.to_string(), "invalid port in address \"host:abc\"");
    }
}
