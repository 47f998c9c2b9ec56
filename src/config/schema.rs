//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listening endpoint settings.
    pub listener: ListenerConfig,

    /// Backend store connection settings.
    pub backend: BackendConfig,

    /// Request parsing limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen address: "host:port", "unix:/path" or "/path".
    pub address: String,

    /// Accept queue length passed to listen(2).
    pub backlog: u32,

    /// Environment variable carrying inherited listening descriptors.
    pub inherit_env: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:9999".to_string(),
            backlog: 128,
            inherit_env: "SERVER_STARTER_PORT".to_string(),
        }
    }
}

/// Backend store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address: "host:port", "unix:/path" or "/path".
    pub address: String,

    /// Fixed delay between a disconnect and the next connect attempt.
    pub reconnect_delay_ms: u64,

    /// Upper bound on a single connect attempt.
    pub connect_timeout_ms: u64,
}

impl BackendConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 1000,
        }
    }
}

/// Limits applied while reading a request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Requests still incomplete beyond this many bytes are rejected.
    pub max_request_bytes: usize,

    /// Maximum number of headers accepted.
    pub max_headers: usize,

    /// Bytes requested from the socket per read.
    pub read_chunk_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 8192,
            max_headers: 20,
            read_chunk_bytes: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}

/// A socket address in either the TCP or the local-socket family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// "host:port", resolved at connect/bind time.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

/// Error returned when an endpoint string cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParseError(pub String);

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint {:?}: expected host:port, unix:/path or /path", self.0)
    }
}

impl std::error::Error for EndpointParseError {}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(EndpointParseError(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError(s.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(EndpointParseError(s.to_string()));
        }
        Ok(Endpoint::Tcp(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
