//! Remote command sessions over SSH exec channels

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use beacon_core::BeaconError;

use crate::traits::Session;

type Outcome = Result<(), BeaconError>;

/// One remote command on the gateway
///
/// After `start`, the channel is owned by a driver task that logs the
/// command's output, closes the channel when asked to and reports how the
/// command ended.
pub struct SshSession {
    /// The channel until the command is started
    channel: Mutex<Option<Channel<Msg>>>,
    /// The driver's report, taken by `wait`
    exited: Mutex<Option<oneshot::Receiver<Outcome>>>,
    /// Cancelled to close the channel
    close: CancellationToken,
}

impl SshSession {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self::with_channel(Some(channel))
    }

    fn with_channel(channel: Option<Channel<Msg>>) -> Self {
        Self {
            channel: Mutex::new(channel),
            exited: Mutex::new(None),
            close: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Session for SshSession {
    async fn start(&self, command: &str, stdin: &[u8]) -> Result<(), BeaconError> {
        let mut channel = self
            .channel
            .lock()
            .await
            .take()
            .ok_or_else(|| BeaconError::Start("session already started or closed".to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| BeaconError::Start(e.to_string()))?;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => break,
                Some(ChannelMsg::Failure) => {
                    return Err(BeaconError::Start(format!(
                        "remote rejected command '{}'",
                        command
                    )));
                }
                Some(ChannelMsg::Close) | None => {
                    return Err(BeaconError::Start(
                        "channel closed before the command started".to_string(),
                    ));
                }
                Some(msg) => log_message("start", &msg),
            }
        }

        if !stdin.is_empty() {
            channel
                .data(stdin)
                .await
                .map_err(|e| BeaconError::Start(e.to_string()))?;
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(drive(channel, self.close.clone(), tx));
        *self.exited.lock().await = Some(rx);

        Ok(())
    }

    async fn wait(&self) -> Result<(), BeaconError> {
        let exited = self
            .exited
            .lock()
            .await
            .take()
            .ok_or_else(|| BeaconError::Wait("session not started".to_string()))?;

        exited
            .await
            .unwrap_or_else(|_| Err(BeaconError::Wait("session driver stopped".to_string())))
    }

    async fn close(&self) -> Result<(), BeaconError> {
        self.close.cancel();

        // Never started: nobody else will close the channel
        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!("Failed to close unstarted channel: {}", e);
            }
        }

        Ok(())
    }
}

/// Own a started channel until it closes
async fn drive(mut channel: Channel<Msg>, close: CancellationToken, tx: oneshot::Sender<Outcome>) {
    let mut exit_status = None;
    let mut exit_signal = None;
    let mut close_sent = false;

    loop {
        tokio::select! {
            _ = close.cancelled(), if !close_sent => {
                close_sent = true;
                let _ = channel.eof().await;
                if let Err(e) = channel.close().await {
                    tracing::debug!("Failed to close channel: {}", e);
                }
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::ExitSignal { signal_name, error_message, .. }) => {
                    exit_signal = Some(format!("{:?} {}", signal_name, error_message));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(msg) => log_message("remote", &msg),
            },
        }
    }

    let _ = tx.send(exit_outcome(exit_status, exit_signal, close_sent));
}

/// How a command ended, from what the channel reported before closing
fn exit_outcome(status: Option<u32>, signal: Option<String>, close_requested: bool) -> Outcome {
    match (status, signal) {
        (Some(0), _) => Ok(()),
        (Some(status), _) => Err(BeaconError::ExitStatus(status)),
        (None, Some(signal)) => Err(BeaconError::Wait(format!(
            "remote command killed by signal {}",
            signal.trim()
        ))),
        // Closing our side first may cut the exit status off
        (None, None) if close_requested => Ok(()),
        (None, None) => Err(BeaconError::Wait(
            "remote command exited without exit status".to_string(),
        )),
    }
}

fn log_message(stage: &str, msg: &ChannelMsg) {
    match msg {
        ChannelMsg::Data { data } => log_output(stage, "stdout", data),
        ChannelMsg::ExtendedData { data, .. } => log_output(stage, "stderr", data),
        other => tracing::trace!(stage, "Channel message: {:?}", other),
    }
}

fn log_output(stage: &str, stream: &str, data: &[u8]) {
    for line in String::from_utf8_lossy(data).lines() {
        if !line.is_empty() {
            tracing::debug!(stage, stream, "{}", line);
        }
    }
}
