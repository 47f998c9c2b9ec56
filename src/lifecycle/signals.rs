//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / SIGINT → trigger graceful shutdown
//! - SIGHUP → logged and ignored
//!
//! SIGPIPE needs no handler: the Rust runtime ignores it at startup, so a
//! write to a vanished peer surfaces as an `EPIPE` error instead.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Install handlers and spawn the task that services them.
///
/// Handlers are installed before returning, so a signal delivered right
/// after this call is not lost.
pub fn spawn_signal_handler(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = terminate.recv() => "SIGTERM",
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = hangup.recv() => {
                    tracing::info!("SIGHUP received, ignoring");
                    continue;
                }
                else => break,
            };

            if shutdown.is_triggered() {
                tracing::info!(signal = name, "Shutdown already in progress");
            } else {
                tracing::info!(signal = name, "Shutdown signal received");
                shutdown.trigger();
            }
        }
    }))
}
