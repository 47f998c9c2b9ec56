//! Startup orchestration.
//!
//! # Order
//! 1. Metrics exporter (if enabled)
//! 2. Listening socket (bound or inherited)
//! 3. Signal handlers
//! 4. Server, which starts the backend supervisor and begins accepting
//!
//! Any failure before step 4 is fatal: the process exits non-zero without
//! serving.

use std::io;
use std::net::AddrParseError;

use thiserror::Error;

use crate::config::GatewayConfig;
use crate::http::GatewayServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address: {0}")]
    MetricsAddress(#[from] AddrParseError),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("signal handlers: {0}")]
    Signals(io::Error),

    #[error("server: {0}")]
    Server(io::Error),
}

/// Bring the gateway up and serve until a termination signal has been
/// handled and all in-flight work has drained.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone()).map_err(StartupError::Signals)?;

    GatewayServer::new(config)
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Server)
}
