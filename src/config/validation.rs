//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that both endpoints parse
//! - Validate value ranges (delays > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{Endpoint, GatewayConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: String| {
        if !ok {
            errors.push(ValidationError { field, message });
        }
    };

    if let Err(e) = config.listener.address.parse::<Endpoint>() {
        check(false, "listener.address", e.to_string());
    }
    check(
        config.listener.backlog > 0,
        "listener.backlog",
        "must be greater than zero".into(),
    );
    check(
        !config.listener.inherit_env.is_empty(),
        "listener.inherit_env",
        "must name an environment variable".into(),
    );

    if let Err(e) = config.backend.address.parse::<Endpoint>() {
        check(false, "backend.address", e.to_string());
    }
    check(
        config.backend.reconnect_delay_ms > 0,
        "backend.reconnect_delay_ms",
        "must be greater than zero".into(),
    );
    check(
        config.backend.connect_timeout_ms > 0,
        "backend.connect_timeout_ms",
        "must be greater than zero".into(),
    );

    check(
        config.limits.max_headers > 0,
        "limits.max_headers",
        "must be greater than zero".into(),
    );
    check(
        config.limits.read_chunk_bytes > 0,
        "limits.read_chunk_bytes",
        "must be greater than zero".into(),
    );
    check(
        config.limits.max_request_bytes >= config.limits.read_chunk_bytes,
        "limits.max_request_bytes",
        format!(
            "must be at least read_chunk_bytes ({})",
            config.limits.read_chunk_bytes
        ),
    );

    if config.observability.metrics_enabled {
        check(
            config.observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
