//! ConnectionRegistry - the live connection-to-session mapping.
//!
//! The registry owns every [`Session`] from the moment a transport connection
//! becomes usable until its disconnect, and publishes create/destroy lifecycle
//! notifications to a set of listeners fixed at construction.
//!
//! Notification semantics mirror the two proxy flavors of the lifecycle event
//! bus this replaces: create listeners may veto a connection (their error
//! propagates, and the transport layer closes the connection through its
//! normal teardown path), while destroy listeners are strictly best-effort -
//! their failures are logged and swallowed so resource release always
//! completes.

use crate::error::RegistryError;
use crate::session::{ConnectionId, Session};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Observer of session lifecycle transitions.
///
/// Listeners are registered once at startup and invoked synchronously; the
/// registry does not wait for any side effects beyond the call returning.
pub trait LifecycleListener: Send + Sync {
    /// Invoked after a session is registered, before the transport layer
    /// resumes. Returning an error rejects the connection.
    fn connection_created(&self, session: &Session) -> anyhow::Result<()>;

    /// Invoked after a session is removed, before its attribute store is
    /// cleared. Failures are logged by the registry and never propagate.
    fn connection_destroyed(&self, session: &Session) -> anyhow::Result<()>;
}

/// Lifecycle listener that logs create/destroy transitions with peer info.
pub struct AuditListener;

impl LifecycleListener for AuditListener {
    fn connection_created(&self, session: &Session) -> anyhow::Result<()> {
        tracing::info!(
            session = %session.id(),
            connection = %session.connection(),
            peer = %session.peer(),
            "Session created"
        );
        Ok(())
    }

    fn connection_destroyed(&self, session: &Session) -> anyhow::Result<()> {
        tracing::info!(
            session = %session.id(),
            connection = %session.connection(),
            peer = %session.peer(),
            "Session destroyed"
        );
        Ok(())
    }
}

/// Maps live transport connections to their sessions.
pub struct ConnectionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl ConnectionRegistry {
    pub fn new(listeners: Vec<Arc<dyn LifecycleListener>>) -> Self {
        Self {
            sessions: DashMap::new(),
            listeners,
        }
    }

    /// Register a session for a freshly connected transport connection and
    /// notify create listeners.
    ///
    /// The session is inserted before listeners run, so `get` succeeds from
    /// inside a listener. A listener error is returned to the caller, which
    /// closes the connection through its normal teardown (the teardown's
    /// `on_disconnect` removes the entry again).
    pub fn on_connect(
        &self,
        id: ConnectionId,
        peer: SocketAddr,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = Arc::new(Session::new(id, peer));
        if let Some(previous) = self.sessions.insert(id, Arc::clone(&session)) {
            // Connection identities are assigned at most once; a collision is
            // a transport-layer bug. The stale session is cleared so holders
            // observe it as inert.
            warn!(connection = %id, stale = %previous.id(), "Replacing stale session");
            previous.clear();
        }
        debug!(connection = %id, session = %session.id(), "Session registered");

        for listener in &self.listeners {
            listener
                .connection_created(&session)
                .map_err(RegistryError::Listener)?;
        }

        Ok(session)
    }

    /// Resolve the session for a live connection.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::NotFound(id))
    }

    /// Remove the session for a closed connection, notify destroy listeners
    /// (best-effort), and clear the session.
    pub fn on_disconnect(&self, id: ConnectionId) -> Result<Arc<Session>, RegistryError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;

        for listener in &self.listeners {
            if let Err(e) = listener.connection_destroyed(&session) {
                // Teardown must always complete; listener failures are not
                // allowed to prevent resource release.
                warn!(connection = %id, error = %e, "Connection-destroyed listener failed");
            }
        }

        session.clear();
        debug!(connection = %id, session = %session.id(), "Session removed");
        Ok(session)
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    struct CountingListener {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            })
        }
    }

    impl LifecycleListener for CountingListener {
        fn connection_created(&self, _session: &Session) -> anyhow::Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn connection_destroyed(&self, _session: &Session) -> anyhow::Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails connection_created; used to exercise the veto path.
    struct RejectingListener;

    impl LifecycleListener for RejectingListener {
        fn connection_created(&self, _session: &Session) -> anyhow::Result<()> {
            anyhow::bail!("rejected")
        }

        fn connection_destroyed(&self, _session: &Session) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Fails connection_destroyed; used to verify teardown isolation.
    struct FaultyDestroyListener;

    impl LifecycleListener for FaultyDestroyListener {
        fn connection_created(&self, _session: &Session) -> anyhow::Result<()> {
            Ok(())
        }

        fn connection_destroyed(&self, _session: &Session) -> anyhow::Result<()> {
            anyhow::bail!("audit backend down")
        }
    }

    #[test]
    fn test_connect_then_get_returns_same_session() {
        let registry = ConnectionRegistry::new(Vec::new());
        let id = ConnectionId::new(1);

        let session = registry.on_connect(id, peer()).unwrap();
        let looked_up = registry.get(id).unwrap();
        assert_eq!(session.id(), looked_up.id());
        assert!(Arc::ptr_eq(&session, &looked_up));
    }

    #[test]
    fn test_get_unknown_connection_fails() {
        let registry = ConnectionRegistry::new(Vec::new());
        let err = registry.get(ConnectionId::new(9)).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == ConnectionId::new(9)));
    }

    #[test]
    fn test_disconnect_removes_and_clears() {
        let registry = ConnectionRegistry::new(Vec::new());
        let id = ConnectionId::new(2);

        let session = registry.on_connect(id, peer()).unwrap();
        session.set("user", json!("alice"));

        let removed = registry.on_disconnect(id).unwrap();
        assert!(Arc::ptr_eq(&session, &removed));
        assert!(removed.is_cleared());
        assert_eq!(removed.attribute_count(), 0);
        assert!(matches!(
            registry.get(id),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_disconnect_without_connect_fails_without_mutation() {
        let listener = CountingListener::new();
        let registry = ConnectionRegistry::new(vec![listener.clone()]);

        let err = registry.on_disconnect(ConnectionId::new(3)).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lifecycle_notifications_fire_once_each() {
        let listener = CountingListener::new();
        let registry = ConnectionRegistry::new(vec![listener.clone()]);
        let id = ConnectionId::new(4);

        registry.on_connect(id, peer()).unwrap();
        assert_eq!(listener.created.load(Ordering::SeqCst), 1);
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 0);

        registry.on_disconnect(id).unwrap();
        assert_eq!(listener.created.load(Ordering::SeqCst), 1);
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_listener_failure_propagates_but_registers() {
        let registry = ConnectionRegistry::new(vec![Arc::new(RejectingListener)]);
        let id = ConnectionId::new(5);

        let err = registry.on_connect(id, peer()).unwrap_err();
        assert!(matches!(err, RegistryError::Listener(_)));

        // Entry stays registered so the caller's teardown can remove it.
        assert!(registry.get(id).is_ok());
        registry.on_disconnect(id).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_destroy_listener_failure_is_swallowed() {
        let registry = ConnectionRegistry::new(vec![Arc::new(FaultyDestroyListener)]);
        let id = ConnectionId::new(6);

        registry.on_connect(id, peer()).unwrap();
        let session = registry.on_disconnect(id).unwrap();

        // Cleanup completed despite the listener failure.
        assert!(session.is_cleared());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_len_tracks_live_sessions() {
        let registry = ConnectionRegistry::new(Vec::new());
        assert!(registry.is_empty());

        registry.on_connect(ConnectionId::new(7), peer()).unwrap();
        registry.on_connect(ConnectionId::new(8), peer()).unwrap();
        assert_eq!(registry.len(), 2);

        registry.on_disconnect(ConnectionId::new(7)).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
