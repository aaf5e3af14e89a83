//! Connection keep-alive monitor
//!
//! russh sends the protocol-level keep-alives and drops the connection once
//! too many go unanswered. The monitor watches for that and reports it once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use beacon_core::BeaconError;

use crate::traits::KeepAlive;

/// Something whose liveness can be checked
#[async_trait]
pub trait Liveness: Send + Sync + 'static {
    /// Whether the connection can still carry traffic
    async fn is_alive(&self) -> bool;
}

/// Check `target` every `interval` until it dies or the monitor is cancelled
pub fn spawn_monitor<L: Liveness>(target: Arc<L>, interval: Duration) -> KeepAlive {
    let (errors_tx, errors) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let alive = tokio::select! {
                _ = token.cancelled() => break,
                alive = target.is_alive() => alive,
            };

            if !alive {
                if !token.is_cancelled() {
                    let _ = errors_tx.try_send(BeaconError::KeepAlive(
                        "connection to gateway lost".to_string(),
                    ));
                }
                break;
            }
        }

        tracing::trace!("Keep-alive monitor stopped");
    });

    KeepAlive { errors, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(AtomicBool);

    #[async_trait]
    impl Liveness for Flag {
        async fn is_alive(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_dead_connection_once() {
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        let mut monitor = spawn_monitor(Arc::clone(&flag), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(monitor.errors.try_recv().is_err());

        flag.0.store(false, Ordering::SeqCst);
        let err = monitor.errors.recv().await.unwrap();
        assert_eq!(err, BeaconError::KeepAlive("connection to gateway lost".into()));

        // The monitor stops after its first report
        assert!(monitor.errors.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_without_error() {
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        let mut monitor = spawn_monitor(Arc::clone(&flag), Duration::from_secs(5));

        monitor.cancel.cancel();
        flag.0.store(false, Ordering::SeqCst);

        assert!(monitor.errors.recv().await.is_none());
    }
}
