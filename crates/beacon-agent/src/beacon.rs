//! Worker registration lifecycle
//!
//! A [`Beacon`] drives one registration attempt per call:
//!
//! ```text
//! Dialing -> SessionOpen -> CommandStarted -> Active -> ShuttingDown -> Closed
//! ```
//!
//! Once active, the attempt ends on whichever comes first: the shutdown
//! token is cancelled, the keep-alive monitor reports a failure, or the remote
//! command exits. The dialed connection is closed exactly once on every
//! path out of the call.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use beacon_core::{BeaconError, EndpointError, RegistrationMode, Worker};

use crate::traits::{Client, Closeable, KeepAlive, Session};

/// Remote command registering the worker under its own addresses
pub const REGISTER_WORKER: &str = "register-worker";
/// Remote command registering the worker through forwarded ports
pub const FORWARD_WORKER: &str = "forward-worker";
/// Remote command retiring the worker
pub const RETIRE_WORKER: &str = "retire-worker";
/// Remote command landing the worker
pub const LAND_WORKER: &str = "land-worker";

/// Which remote operation an attempt performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Register according to the beacon's registration mode
    Register,
    /// Register through forwarded ports regardless of mode
    Forward,
    /// Retire the worker
    Retire,
    /// Land the worker
    Land,
}

impl Lifecycle {
    /// Whether the attempt forwards the worker's ports
    pub fn forwards_ports(self) -> bool {
        matches!(self, Lifecycle::Register | Lifecycle::Forward)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Register => write!(f, "register"),
            Lifecycle::Forward => write!(f, "forward"),
            Lifecycle::Retire => write!(f, "retire"),
            Lifecycle::Land => write!(f, "land"),
        }
    }
}

/// Build the remote command line for an attempt
pub fn command_for(
    lifecycle: Lifecycle,
    mode: RegistrationMode,
    worker: &Worker,
) -> Result<String, EndpointError> {
    match (lifecycle, mode) {
        (Lifecycle::Register, RegistrationMode::Direct) => Ok(REGISTER_WORKER.to_string()),
        (Lifecycle::Register, RegistrationMode::Forward) | (Lifecycle::Forward, _) => {
            Ok(format!(
                "{} --garden {} --baggageclaim {}",
                FORWARD_WORKER,
                worker.garden_forward_addr()?,
                worker.baggageclaim_forward_addr()?
            ))
        }
        (Lifecycle::Retire, _) => Ok(RETIRE_WORKER.to_string()),
        (Lifecycle::Land, _) => Ok(LAND_WORKER.to_string()),
    }
}

/// The `(bind, target)` pairs forwarded for a worker, garden first
pub fn forwards_for(worker: &Worker) -> Result<Vec<(String, String)>, EndpointError> {
    Ok(vec![
        (worker.garden_forward_addr()?, worker.garden_endpoint()?),
        (
            worker.baggageclaim_forward_addr()?,
            worker.baggageclaim_endpoint()?,
        ),
    ])
}

/// What ended an active attempt
enum Trigger {
    Shutdown,
    KeepAlive(BeaconError),
    Exited(Result<(), BeaconError>),
}

/// Registers a worker with the scheduler
pub struct Beacon<C: Client> {
    client: C,
    worker: Worker,
    mode: RegistrationMode,
}

impl<C: Client> Beacon<C> {
    /// Create a beacon in the default registration mode
    pub fn new(client: C, worker: Worker) -> Self {
        Self {
            client,
            worker,
            mode: RegistrationMode::default(),
        }
    }

    /// Set the registration mode
    pub fn with_mode(mut self, mode: RegistrationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Register the worker and stay registered until shut down
    pub async fn register(
        &self,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        self.run(Lifecycle::Register, shutdown, ready).await
    }

    /// Register the worker through forwarded ports
    pub async fn forward(
        &self,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        self.run(Lifecycle::Forward, shutdown, ready).await
    }

    /// Ask the scheduler to retire the worker
    pub async fn retire(
        &self,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        self.run(Lifecycle::Retire, shutdown, ready).await
    }

    /// Ask the scheduler to land the worker
    pub async fn land(
        &self,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        self.run(Lifecycle::Land, shutdown, ready).await
    }

    /// Run one attempt, releasing the connection on every path out
    pub async fn run(
        &self,
        lifecycle: Lifecycle,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        let span = tracing::info_span!(
            "beacon",
            worker = %self.worker.name,
            lifecycle = %lifecycle,
            mode = %self.mode
        );

        async move {
            tracing::debug!(state = "dialing");
            let conn = self.client.dial().await?;

            let result = self.with_session(&conn, lifecycle, shutdown, ready).await;

            if let Err(e) = conn.close().await {
                tracing::warn!("Failed to close connection: {}", e);
            }
            tracing::debug!(state = "closed");

            result
        }
        .instrument(span)
        .await
    }

    async fn with_session(
        &self,
        conn: &C::Connection,
        lifecycle: Lifecycle,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        let session = Arc::new(self.client.new_session(conn).await?);
        tracing::debug!(state = "session_open");

        let result = self
            .drive(conn, &session, lifecycle, shutdown, ready)
            .await;

        // Second close on the shutdown path; the session tolerates it.
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close session: {}", e);
        }

        result
    }

    async fn drive(
        &self,
        conn: &C::Connection,
        session: &Arc<C::Session>,
        lifecycle: Lifecycle,
        shutdown: &CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), BeaconError> {
        let command = command_for(lifecycle, self.mode, &self.worker)?;

        session.start(&command, &self.worker.payload()).await?;
        tracing::info!("Started '{}'", command);
        let _ = ready.send(());
        tracing::debug!(state = "command_started");

        if lifecycle.forwards_ports() {
            for (bind, target) in forwards_for(&self.worker)? {
                self.client.proxy(conn, &bind, &target).await?;
                tracing::debug!("Forwarding {} to {}", bind, target);
            }
        }

        let KeepAlive { mut errors, cancel } = self.client.keep_alive(conn);
        let _stop_keep_alive = cancel.clone().drop_guard();

        let (exited_tx, mut exited_rx) = oneshot::channel();
        let waiter = Arc::clone(session);
        tokio::spawn(async move {
            let _ = exited_tx.send(waiter.wait().await);
        });
        tracing::debug!(state = "active");

        let trigger = tokio::select! {
            _ = shutdown.cancelled() => Trigger::Shutdown,
            Some(err) = errors.recv() => Trigger::KeepAlive(err),
            outcome = &mut exited_rx => Trigger::Exited(wait_outcome(outcome)),
        };

        match trigger {
            Trigger::Shutdown => {
                tracing::info!("Shutdown requested, closing session");
                tracing::debug!(state = "shutting_down");
                cancel.cancel();
                if let Err(e) = session.close().await {
                    tracing::warn!("Failed to close session: {}", e);
                }
                let outcome = wait_outcome(exited_rx.await);
                tracing::info!("Remote command finished after shutdown");
                outcome
            }
            Trigger::KeepAlive(err) => {
                tracing::warn!("Keep-alive failed: {}", err);
                Err(err)
            }
            Trigger::Exited(outcome) => {
                match &outcome {
                    Ok(()) => tracing::info!("Remote command exited"),
                    Err(e) => tracing::warn!("Remote command failed: {}", e),
                }
                outcome
            }
        }
    }
}

fn wait_outcome(
    received: Result<Result<(), BeaconError>, oneshot::error::RecvError>,
) -> Result<(), BeaconError> {
    received.unwrap_or_else(|_| {
        Err(BeaconError::Wait(
            "session wait ended without a result".to_string(),
        ))
    })
}
