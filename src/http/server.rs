//! Gateway server: accept loop and shutdown coordination.
//!
//! # Responsibilities
//! - Start the backend supervisor
//! - Accept connections and spawn a [`Connection`] task for each
//! - On shutdown: refuse new connections, stop backend reconnects, wait for
//!   the registry to drain, then terminate the backend and release the
//!   accept socket
//!
//! # Shutdown sequence
//! ```text
//! shutdown signal
//!     → registry.begin_shutdown()  (closing = true; accepts are closed at once)
//!     → supervisor.begin_drain()   (no reconnects)
//!     → last Connection dropped → registry drained
//!     → supervisor.terminate()     (session closed, reconnect timer cancelled)
//!     → listener dropped
//! ```

use std::io;
use std::time::Duration;

use crate::backend::{BackendHandle, BackendSupervisor};
use crate::config::{Endpoint, GatewayConfig};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ClientStream, Connection, ConnectionRegistry, Listener};

/// Pause after a failed accept (e.g. descriptor limit reached).
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// HTTP front end of the gateway.
pub struct GatewayServer {
    config: GatewayConfig,
    registry: ConnectionRegistry,
}

impl GatewayServer {
    /// Create a new server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    /// The live-connection registry, shared with connection tasks.
    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Serve until `shutdown` fires and every in-flight connection has
    /// finished. Returns once the backend session and the listener are
    /// released.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> io::Result<()> {
        let endpoint: Endpoint = self
            .config
            .backend
            .address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let (supervisor, backend) =
            BackendSupervisor::spawn(endpoint.clone(), &self.config.backend);

        tracing::info!(
            address = %listener.local_addr().unwrap_or_default(),
            backend = %endpoint,
            "Gateway serving"
        );

        let mut closing = false;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv(), if !closing => {
                    closing = true;
                    tracing::info!(
                        in_flight = self.registry.active_count(),
                        "Shutdown requested, draining connections"
                    );
                    supervisor.begin_drain();
                    self.registry.begin_shutdown();
                }
                _ = self.registry.wait_drained(), if closing => break,
                accepted = listener.accept() => self.accept_one(accepted, &backend).await,
            }
        }

        supervisor.terminate().await;
        drop(listener);
        tracing::info!("Gateway stopped");
        Ok(())
    }

    async fn accept_one(
        &self,
        accepted: io::Result<(ClientStream, String)>,
        backend: &BackendHandle,
    ) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                return;
            }
        };

        let Some(guard) = self.registry.register(peer.as_str()) else {
            tracing::debug!(peer = %peer, "Refusing connection during shutdown");
            return;
        };
        tracing::debug!(connection_id = %guard.id(), peer = %peer, "Connection accepted");

        let limits = self.config.limits;
        match stream {
            ClientStream::Tcp(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                tokio::spawn(Connection::new(stream, guard, backend.clone(), limits).run());
            }
            ClientStream::Unix(stream) => {
                tokio::spawn(Connection::new(stream, guard, backend.clone(), limits).run());
            }
        }
    }
}
