//! SSH connection client
//!
//! Dials the scheduler's gateway, authenticates with the worker key and
//! serves the forwarded channels the gateway opens back to us.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use beacon_core::config::BeaconConfig;
use beacon_core::types::split_host_port;
use beacon_core::BeaconError;

use super::keepalive::{spawn_monitor, Liveness};
use super::session::SshSession;
use crate::traits::{Client, Closeable, KeepAlive};

/// Local targets for remote forwards, keyed by the remote bind port
type ForwardTable = Arc<DashMap<u32, String>>;

/// Errors constructing the client
#[derive(Debug, Error)]
pub enum SshClientError {
    /// Private key file missing or unreadable
    #[error("Private key not found at {path}: {message}")]
    KeyNotFound { path: String, message: String },
}

/// Reaches the scheduler's SSH gateway
pub struct SshClient {
    address: String,
    username: String,
    host_keys: Vec<String>,
    key: Arc<KeyPair>,
    connect_timeout: Duration,
    keepalive_interval: Duration,
    keepalive_timeout: Duration,
}

impl SshClient {
    /// Create a client, loading the worker's private key
    pub fn new(config: &BeaconConfig) -> Result<Self, SshClientError> {
        let path = config.private_key_path.display().to_string();
        if !config.private_key_path.exists() {
            return Err(SshClientError::KeyNotFound {
                path,
                message: "File does not exist".to_string(),
            });
        }

        let key = russh_keys::load_secret_key(&config.private_key_path, None).map_err(|e| {
            SshClientError::KeyNotFound {
                path: path.clone(),
                message: format!("Failed to load key: {}", e),
            }
        })?;

        Ok(Self {
            address: config.tsa_address.clone(),
            username: config.username.clone(),
            host_keys: config.tsa_host_keys.clone(),
            key: Arc::new(key),
            connect_timeout: config.connect_timeout,
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
        })
    }

    fn ssh_config(&self) -> Config {
        Config {
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: keepalive_max(self.keepalive_interval, self.keepalive_timeout),
            ..Default::default()
        }
    }
}

/// Unanswered keep-alives tolerated before russh drops the connection
fn keepalive_max(interval: Duration, timeout: Duration) -> usize {
    if interval.is_zero() {
        return 1;
    }
    let max = timeout.as_secs_f64() / interval.as_secs_f64();
    (max.ceil() as usize).max(1)
}

/// Move a forward requested on port 0 to the port the gateway chose
fn rekey_forward(forwards: &DashMap<u32, String>, requested: u32, bound: u32) {
    if requested != 0 || bound == 0 {
        return;
    }
    if let Some((_, target)) = forwards.remove(&requested) {
        forwards.insert(bound, target);
    }
}

#[async_trait]
impl Client for SshClient {
    type Connection = SshConnection;
    type Session = SshSession;

    async fn dial(&self) -> Result<SshConnection, BeaconError> {
        let forwards: ForwardTable = Arc::new(DashMap::new());
        let handler = ClientHandler::new(self.host_keys.clone(), Arc::clone(&forwards));

        tracing::debug!("Connecting to {}", self.address);
        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(Arc::new(self.ssh_config()), self.address.as_str(), handler),
        )
        .await
        .map_err(|_| BeaconError::Dial(format!("connection to {} timed out", self.address)))?
        .map_err(|e| BeaconError::Dial(e.to_string()))?;

        tracing::debug!("Authenticating as user '{}'", self.username);
        let authenticated = handle
            .authenticate_publickey(&self.username, Arc::clone(&self.key))
            .await
            .map_err(|e| BeaconError::Dial(e.to_string()))?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication rejected", "en")
                .await;
            return Err(BeaconError::Dial(format!(
                "authentication rejected for user '{}'",
                self.username
            )));
        }

        tracing::info!("Connected to {}", self.address);
        Ok(SshConnection::new(handle, forwards))
    }

    async fn new_session(&self, conn: &SshConnection) -> Result<SshSession, BeaconError> {
        let channel = conn
            .handle
            .lock()
            .await
            .channel_open_session()
            .await
            .map_err(|e| BeaconError::Session(e.to_string()))?;

        Ok(SshSession::new(channel))
    }

    async fn proxy(
        &self,
        conn: &SshConnection,
        bind: &str,
        target: &str,
    ) -> Result<(), BeaconError> {
        let (host, port) = split_host_port(bind).map_err(|e| BeaconError::Proxy(e.to_string()))?;
        let port = u32::from(port);

        // Registered first: the gateway may open channels as soon as it replies
        conn.forwards.insert(port, target.to_string());

        let bound = conn
            .handle
            .lock()
            .await
            .tcpip_forward(host, port)
            .await
            .map_err(|e| {
                conn.forwards.remove(&port);
                BeaconError::Proxy(e.to_string())
            })?;

        rekey_forward(&conn.forwards, port, bound);
        tracing::debug!("Gateway bound {}:{} for {}", host, bound, target);

        Ok(())
    }

    fn keep_alive(&self, conn: &SshConnection) -> KeepAlive {
        spawn_monitor(Arc::clone(&conn.handle), self.keepalive_interval)
    }
}

/// A dialed connection to the gateway
pub struct SshConnection {
    handle: Arc<Mutex<Handle<ClientHandler>>>,
    forwards: ForwardTable,
    closed: AtomicBool,
}

impl SshConnection {
    fn new(handle: Handle<ClientHandler>, forwards: ForwardTable) -> Self {
        Self {
            handle: Arc::new(Mutex::new(handle)),
            forwards,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Closeable for SshConnection {
    async fn close(&self) -> Result<(), BeaconError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.forwards.clear();
        let handle = self.handle.lock().await;
        if handle.is_closed() {
            return Ok(());
        }

        handle
            .disconnect(Disconnect::ByApplication, "beacon shutting down", "en")
            .await
            .map_err(|e| BeaconError::Close(e.to_string()))
    }
}

#[async_trait]
impl Liveness for Mutex<Handle<ClientHandler>> {
    async fn is_alive(&self) -> bool {
        !self.lock().await.is_closed()
    }
}

/// SSH client handler for the beacon
struct ClientHandler {
    /// Accepted host key fingerprints
    host_keys: Vec<String>,
    /// Where forwarded channels are delivered
    forwards: ForwardTable,
}

impl ClientHandler {
    fn new(host_keys: Vec<String>, forwards: ForwardTable) -> Self {
        Self {
            host_keys: host_keys
                .iter()
                .map(|k| normalize_fingerprint(k).to_string())
                .collect(),
            forwards,
        }
    }
}

fn normalize_fingerprint(fingerprint: &str) -> &str {
    let fingerprint = fingerprint.trim();
    fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint)
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Gateway host key: SHA256:{}", fingerprint);

        if self.host_keys.is_empty() {
            tracing::warn!("No gateway host keys configured, accepting SHA256:{}", fingerprint);
            return Ok(true);
        }

        let known = self
            .host_keys
            .iter()
            .any(|k| k == normalize_fingerprint(&fingerprint));
        if !known {
            tracing::error!("Gateway host key SHA256:{} is not trusted", fingerprint);
        }
        Ok(known)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let Some(target) = self.forwards.get(&connected_port).map(|t| t.value().clone()) else {
            tracing::warn!(
                "Forwarded connection for unknown bind {}:{}",
                connected_address,
                connected_port
            );
            return Ok(());
        };

        tracing::debug!(
            "Forwarded connection from {}:{} to {}",
            originator_address,
            originator_port,
            target
        );
        tokio::spawn(pipe(channel, target));
        Ok(())
    }
}

/// Join a forwarded channel with a fresh connection to the local target
async fn pipe(channel: Channel<Msg>, target: String) {
    let mut local = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Failed to reach {}: {}", target, e);
            let _ = channel.close().await;
            return;
        }
    };

    let mut remote = channel.into_stream();
    match tokio::io::copy_bidirectional(&mut remote, &mut local).await {
        Ok((sent, received)) => {
            tracing::trace!("Forward to {} done ({} up, {} down)", target, sent, received)
        }
        Err(e) => tracing::debug!("Forward to {} ended: {}", target, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_max() {
        let secs = Duration::from_secs;
        assert_eq!(keepalive_max(secs(5), secs(10)), 2);
        assert_eq!(keepalive_max(secs(5), secs(12)), 3);
        assert_eq!(keepalive_max(secs(10), secs(1)), 1);
        assert_eq!(keepalive_max(Duration::ZERO, secs(10)), 1);
    }

    #[test]
    fn test_rekey_gateway_chosen_port() {
        let forwards = DashMap::new();
        forwards.insert(0, "1.2.3.4:7777".to_string());

        rekey_forward(&forwards, 0, 40123);
        assert!(forwards.get(&0).is_none());
        assert_eq!(forwards.get(&40123).unwrap().value(), "1.2.3.4:7777");
    }

    #[test]
    fn test_rekey_keeps_requested_port() {
        let forwards = DashMap::new();
        forwards.insert(7777, "1.2.3.4:7777".to_string());

        rekey_forward(&forwards, 7777, 7777);
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards.get(&7777).unwrap().value(), "1.2.3.4:7777");
    }

    #[test]
    fn test_normalize_fingerprint() {
        assert_eq!(normalize_fingerprint("SHA256:abc"), "abc");
        assert_eq!(normalize_fingerprint(" abc "), "abc");
    }

    #[test]
    fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BeaconConfig::default();
        config.private_key_path = dir.path().join("missing_key");

        let err = SshClient::new(&config).err().unwrap();
        assert!(matches!(err, SshClientError::KeyNotFound { .. }));
    }

    #[test]
    fn test_unreadable_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_key");
        std::fs::write(&path, "not a key").unwrap();

        let mut config = BeaconConfig::default();
        config.private_key_path = path;

        let err = SshClient::new(&config).err().unwrap();
        assert!(err.to_string().contains("Failed to load key"));
    }
}
