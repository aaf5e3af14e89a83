//! Connection client traits

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_core::BeaconError;

use super::Session;

/// A handle released once when the attempt that dialed it ends
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Release the underlying resource
    async fn close(&self) -> Result<(), BeaconError>;
}

/// A running keep-alive monitor
pub struct KeepAlive {
    /// Receives at most the first failure the monitor detects
    pub errors: mpsc::Receiver<BeaconError>,
    /// Cancelling stops the monitor without reporting an error
    pub cancel: CancellationToken,
}

/// Dials the scheduler and operates on the resulting connection
#[async_trait]
pub trait Client: Send + Sync {
    /// The dialed transport connection
    type Connection: Closeable;

    /// Sessions opened on a connection
    type Session: Session;

    /// Open a transport connection
    async fn dial(&self) -> Result<Self::Connection, BeaconError>;

    /// Open a new session on `conn`
    async fn new_session(&self, conn: &Self::Connection) -> Result<Self::Session, BeaconError>;

    /// Forward connections made to `bind` on the remote side to `target`
    async fn proxy(
        &self,
        conn: &Self::Connection,
        bind: &str,
        target: &str,
    ) -> Result<(), BeaconError>;

    /// Start probing `conn` for liveness
    fn keep_alive(&self, conn: &Self::Connection) -> KeepAlive;
}
