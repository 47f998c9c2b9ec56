//! Structured logging.
//!
//! `RUST_LOG` takes precedence; otherwise the configured level applies to
//! this crate only.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_directive(log_level: &str) -> String {
    format!("kv_http_gateway={}", log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_this_crate() {
        assert_eq!(default_directive("debug"), "kv_http_gateway=debug");
        assert!(EnvFilter::try_new(default_directive("warn")).is_ok());
    }
}
