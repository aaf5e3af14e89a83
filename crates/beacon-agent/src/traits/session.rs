//! Remote session trait

use async_trait::async_trait;

use beacon_core::BeaconError;

/// One command execution over the transport connection
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Start `command` on the remote side, writing `stdin` to it once running.
    ///
    /// Fails if the remote side rejects the command.
    async fn start(&self, command: &str, stdin: &[u8]) -> Result<(), BeaconError>;

    /// Block until the remote command exits.
    ///
    /// Returns `Ok(())` on a clean exit.
    async fn wait(&self) -> Result<(), BeaconError>;

    /// Request the session to close.
    ///
    /// Must be idempotent: the beacon closes every session once when shutting
    /// down and again during cleanup.
    async fn close(&self) -> Result<(), BeaconError>;
}
