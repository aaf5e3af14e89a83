//! Beacon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::{RegistrationMode, Worker};

/// Configuration for the beacon agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Address of the scheduler's SSH registration gateway
    pub tsa_address: String,

    /// Accepted gateway host key fingerprints (`SHA256:...`).
    ///
    /// When empty, any host key is accepted and a warning is logged.
    pub tsa_host_keys: Vec<String>,

    /// Path to the worker's private key
    pub private_key_path: PathBuf,

    /// Username for SSH authentication
    pub username: String,

    /// How the worker is advertised
    pub registration_mode: RegistrationMode,

    /// Timeout for establishing the SSH connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How often keep-alives are sent and the connection is checked
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// How long the gateway may leave keep-alives unanswered before the
    /// connection is dropped
    #[serde(with = "duration_secs")]
    pub keepalive_timeout: Duration,

    /// The worker being advertised
    pub worker: WorkerConfig,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            tsa_address: "localhost:2222".to_string(),
            tsa_host_keys: vec![],
            private_key_path: super::default_config_dir().join("worker_key"),
            username: "beacon".to_string(),
            registration_mode: RegistrationMode::default(),
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(10),
            worker: WorkerConfig::default(),
        }
    }
}

impl BeaconConfig {
    /// Check the values that cannot be defaulted sensibly
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tsa_address.is_empty() {
            return Err(ConfigError::MissingField("tsa_address".to_string()));
        }
        if self.worker.garden_addr.is_empty() {
            return Err(ConfigError::MissingField("worker.garden_addr".to_string()));
        }
        if self.worker.baggageclaim_url.is_empty() {
            return Err(ConfigError::MissingField(
                "worker.baggageclaim_url".to_string(),
            ));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive_interval must be greater than zero".to_string(),
            ));
        }

        let worker = self.worker.to_worker();
        worker
            .garden_endpoint()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        worker
            .baggageclaim_endpoint()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }
}

/// Worker section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name (optional, defaults to hostname)
    pub name: Option<String>,

    /// Compute runtime address, `host:port`
    pub garden_addr: String,

    /// Volume cache URL, `scheme://host:port`
    pub baggageclaim_url: String,

    /// Container platform
    pub platform: String,

    /// Worker tags
    pub tags: Vec<String>,

    /// Team the worker belongs to
    pub team: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            garden_addr: "127.0.0.1:7777".to_string(),
            baggageclaim_url: "http://127.0.0.1:7788".to_string(),
            platform: std::env::consts::OS.to_string(),
            tags: vec![],
            team: None,
        }
    }
}

impl WorkerConfig {
    /// Get the worker name, falling back to hostname
    pub fn worker_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Build the advertised worker descriptor
    pub fn to_worker(&self) -> Worker {
        Worker {
            garden_addr: self.garden_addr.clone(),
            baggageclaim_url: self.baggageclaim_url.clone(),
            name: self.worker_name(),
            platform: self.platform.clone(),
            tags: self.tags.clone(),
            team: self.team.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BeaconConfig::default();
        assert_eq!(config.registration_mode, RegistrationMode::Forward);
        assert_eq!(config.username, "beacon");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BeaconConfig = toml::from_str(
            r#"
            tsa_address = "tsa:2222"
            registration_mode = "direct"
            keepalive_interval = "15s"

            [worker]
            name = "w1"
            garden_addr = "1.2.3.4:7777"
            baggageclaim_url = "wat://5.6.7.8:7788"
            "#,
        )
        .unwrap();

        assert_eq!(config.tsa_address, "tsa:2222");
        assert_eq!(config.registration_mode, RegistrationMode::Direct);
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));

        let worker = config.worker.to_worker();
        assert_eq!(worker.name, "w1");
        assert_eq!(worker.garden_addr, "1.2.3.4:7777");
        assert_eq!(worker.baggageclaim_url, "wat://5.6.7.8:7788");
    }

    #[test]
    fn test_validate_rejects_bad_endpoints() {
        let mut config = BeaconConfig::default();
        config.worker.garden_addr = "nowhere".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = BeaconConfig::default();
        config.worker.baggageclaim_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "worker.baggageclaim_url"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = BeaconConfig::default();
        config.keepalive_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_worker_name_falls_back_to_hostname() {
        let worker = WorkerConfig::default();
        assert!(!worker.worker_name().is_empty());
    }
}
