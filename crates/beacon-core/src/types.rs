//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EndpointError;

/// Host the scheduler binds forwarded worker ports on
pub const WILDCARD_BIND_HOST: &str = "0.0.0.0";

/// How the worker is advertised to the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    /// Tunnel the worker's ports through the SSH connection
    #[default]
    Forward,
    /// Advertise the worker's own addresses without tunneling
    Direct,
}

impl fmt::Display for RegistrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationMode::Forward => write!(f, "forward"),
            RegistrationMode::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for RegistrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(RegistrationMode::Forward),
            "direct" => Ok(RegistrationMode::Direct),
            other => Err(format!(
                "unknown registration mode '{}' (expected 'forward' or 'direct')",
                other
            )),
        }
    }
}

/// The endpoints and metadata a worker advertises to the scheduler
///
/// Serialized as JSON onto the stdin of every remote command, so the
/// scheduler knows which worker the connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Compute runtime (garden) address, `host:port`
    #[serde(rename = "addr")]
    pub garden_addr: String,

    /// Volume cache (baggageclaim) URL, `scheme://host:port`
    pub baggageclaim_url: String,

    /// Worker name
    #[serde(default)]
    pub name: String,

    /// Platform of the containers this worker runs
    #[serde(default)]
    pub platform: String,

    /// Tags used to steer steps onto this worker
    #[serde(default)]
    pub tags: Vec<String>,

    /// Team the worker is restricted to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

impl Worker {
    /// Create a worker from its two endpoints
    pub fn new(garden_addr: impl Into<String>, baggageclaim_url: impl Into<String>) -> Self {
        Self {
            garden_addr: garden_addr.into(),
            baggageclaim_url: baggageclaim_url.into(),
            name: String::new(),
            platform: std::env::consts::OS.to_string(),
            tags: vec![],
            team: None,
        }
    }

    /// The compute runtime endpoint as `host:port`
    pub fn garden_endpoint(&self) -> Result<String, EndpointError> {
        let (host, port) = split_host_port(&self.garden_addr)?;
        Ok(join_host_port(host, port))
    }

    /// The volume cache endpoint as `host:port`, with the scheme stripped
    pub fn baggageclaim_endpoint(&self) -> Result<String, EndpointError> {
        let url = url::Url::parse(&self.baggageclaim_url).map_err(|e| {
            EndpointError::InvalidUrl {
                url: self.baggageclaim_url.clone(),
                reason: e.to_string(),
            }
        })?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::InvalidUrl {
                url: self.baggageclaim_url.clone(),
                reason: "missing host".to_string(),
            })?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| EndpointError::InvalidPort(self.baggageclaim_url.clone()))?;

        Ok(join_host_port(host, port))
    }

    /// Address the scheduler should bind for the garden forward
    pub fn garden_forward_addr(&self) -> Result<String, EndpointError> {
        let (_, port) = split_host_port(&self.garden_addr)?;
        Ok(join_host_port(WILDCARD_BIND_HOST, port))
    }

    /// Address the scheduler should bind for the baggageclaim forward
    pub fn baggageclaim_forward_addr(&self) -> Result<String, EndpointError> {
        let endpoint = self.baggageclaim_endpoint()?;
        let (_, port) = split_host_port(&endpoint)?;
        Ok(join_host_port(WILDCARD_BIND_HOST, port))
    }

    /// JSON payload written to the remote command's stdin
    pub fn payload(&self) -> Vec<u8> {
        // Plain strings and vectors always serialize
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Split a `host:port` address, accepting bracketed IPv6 hosts
pub fn split_host_port(addr: &str) -> Result<(&str, u16), EndpointError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| EndpointError::InvalidAddress(addr.to_string()))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.contains(':') && !addr.starts_with('[') {
        return Err(EndpointError::InvalidAddress(addr.to_string()));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(addr.to_string()))?;

    Ok((host, port))
}

/// Join a host and port, bracketing IPv6 hosts
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
