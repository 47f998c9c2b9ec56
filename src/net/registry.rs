//! Registry of live client connections and drain detection.
//!
//! # Responsibilities
//! - Assign connection IDs and record live connections
//! - Refuse registration once shutdown has begun
//! - Signal, exactly once, that shutdown may complete: the registry is
//!   closing and empty
//!
//! Membership is held by a [`ConnectionGuard`]; dropping the guard is the
//! only way to leave the registry, so removal happens exactly once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Live connections keyed by ID, with the peer description for logging.
    live: BTreeMap<ConnectionId, String>,
    /// Monotonic: false → true.
    closing: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RegistryState>,
    drained: watch::Sender<bool>,
}

/// Tracks live connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                drained,
            }),
        }
    }

    /// Add a connection. Returns `None` once shutdown has begun.
    pub fn register(&self, peer: impl Into<String>) -> Option<ConnectionGuard> {
        let mut state = self.lock();
        if state.closing {
            return None;
        }
        let id = ConnectionId::new();
        state.live.insert(id, peer.into());
        drop(state);

        metrics::connection_opened();
        Some(ConnectionGuard {
            registry: self.clone(),
            id,
        })
    }

    pub fn active_count(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_closing(&self) -> bool {
        self.lock().closing
    }

    /// Stop admitting connections. Returns true if the registry was already
    /// empty, in which case the drained signal has fired.
    pub fn begin_shutdown(&self) -> bool {
        let mut state = self.lock();
        state.closing = true;
        self.finalize_if_drained(&state)
    }

    pub fn is_drained(&self) -> bool {
        *self.shared.drained.borrow()
    }

    /// Resolves once shutdown has begun and the last connection has closed.
    pub async fn wait_drained(&self) {
        let mut rx = self.shared.drained.subscribe();
        let _ = rx.wait_for(|drained| *drained).await;
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        let mut state = self.lock();
        let peer = state.live.remove(&id);
        tracing::trace!(
            connection_id = %id,
            peer = peer.as_deref().unwrap_or("?"),
            remaining = state.live.len(),
            "Connection released"
        );
        self.finalize_if_drained(&state);
    }

    /// The single point where the drained signal fires; it fires at most once.
    fn finalize_if_drained(&self, state: &MutexGuard<'_, RegistryState>) -> bool {
        if !state.closing || !state.live.is_empty() {
            return false;
        }
        let fired = self.shared.drained.send_if_modified(|drained| {
            if *drained {
                false
            } else {
                *drained = true;
                true
            }
        });
        if fired {
            tracing::info!("All connections drained");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry membership of one connection. Leaves the registry on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.on_connection_closed(self.id);
        metrics::connection_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn registry_counts() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let guard1 = registry.register("a").unwrap();
        let guard2 = registry.register("b").unwrap();
        assert_eq!(registry.active_count(), 2);

        assert!(guard1.id() < guard2.id());

        drop(guard1);
        assert_eq!(registry.active_count(), 1);
        drop(guard2);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_drained());
    }

    #[test]
    fn shutdown_on_empty_registry_drains_immediately() {
        let registry = ConnectionRegistry::new();
        assert!(registry.begin_shutdown());
        assert!(registry.is_drained());
        assert!(registry.register("late").is_none());
    }

    #[test]
    fn shutdown_waits_for_last_connection() {
        let registry = ConnectionRegistry::new();
        let a = registry.register("a").unwrap();
        let b = registry.register("b").unwrap();

        assert!(!registry.begin_shutdown());
        assert!(registry.is_closing());
        assert!(registry.register("c").is_none());

        drop(a);
        assert!(!registry.is_drained());
        drop(b);
        assert!(registry.is_drained());
    }

    #[tokio::test]
    async fn wait_drained_resolves_after_last_close() {
        let registry = ConnectionRegistry::new();
        let guard = registry.register("a").unwrap();
        registry.begin_shutdown();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
