//! kv-http-gateway
//!
//! Read-only HTTP facade over a RESP key-value store.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                   GATEWAY                        │
//!   GET /<key>         │  ┌──────────┐   ┌────────────┐   ┌────────────┐  │
//!   ───────────────────┼─▶│   net    │──▶│ connection │──▶│  backend   │──┼──▶ Store
//!                      │  │ listener │   │ state      │   │ supervisor │  │   (RESP)
//!                      │  └──────────┘   │ machine    │   └─────┬──────┘  │
//!   HTTP/1.0 response  │                 │            │◀────────┘        │
//!   ◀──────────────────┼─────────────────│ response   │                  │
//!                      │                 └────────────┘                  │
//!                      │  config · lifecycle (signals, drain) · tracing  │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use kv_http_gateway::config::loader::{load_config, validated};
use kv_http_gateway::config::GatewayConfig;
use kv_http_gateway::lifecycle::startup;
use kv_http_gateway::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "kv-http-gateway")]
#[command(about = "Serve GET /<key> from a RESP key-value store", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (host:port, unix:/path or /path)
    #[arg(short, long)]
    listen: Option<String>,

    /// Backend address (host:port, unix:/path or /path)
    #[arg(short, long)]
    backend: Option<String>,

    /// Delay between backend reconnect attempts, in milliseconds
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut GatewayConfig) {
        if let Some(listen) = &self.listen {
            config.listener.address = listen.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.address = backend.clone();
        }
        if let Some(delay) = self.reconnect_delay_ms {
            config.backend.reconnect_delay_ms = delay;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    let config = validated(config)?;

    init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listener.address,
        backend = %config.backend.address,
        reconnect_delay_ms = config.backend.reconnect_delay_ms,
        "kv-http-gateway starting"
    );

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
