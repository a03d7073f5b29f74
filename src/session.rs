//! Session - the logical, detachable representation of one client connection.
//!
//! A [`Session`] outlives the raw transport handle that created it: other
//! components may hold an `Arc<Session>` after the socket is gone, so teardown
//! is an explicit [`Session::clear`] rather than a drop. After clearing, the
//! attribute store is empty and inert; late readers observe an empty session.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Transport-level connection identity.
///
/// Assigned exactly once per accepted connection (and once for the listening
/// socket) by the server's [`ConnectionIdGenerator`]; never reused within a
/// server lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator for [`ConnectionId`]s.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// One logical connection's state, detached from the transport object.
pub struct Session {
    id: Uuid,
    connection: ConnectionId,
    peer: SocketAddr,
    attributes: RwLock<HashMap<String, Value>>,
    cleared: AtomicBool,
}

impl Session {
    pub fn new(connection: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            peer,
            attributes: RwLock::new(HashMap::new()),
            cleared: AtomicBool::new(false),
        }
    }

    /// Unique logical identity, stable for the session's lifetime.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The transport connection this session was created for.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Remote peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Store a session-scoped attribute, replacing any previous value.
    ///
    /// Writes against a cleared session are dropped: the session must not be
    /// reused after removal from the registry.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        // The flag is evaluated under the same write lock the insert uses, so
        // a concurrent clear() cannot slip between the check and the insert.
        let mut attributes = self.attributes.write();
        if self.is_cleared() {
            debug!(session = %self.id, "Attribute write on cleared session ignored");
            return;
        }
        attributes.insert(key.into(), value);
    }

    /// Fetch a session-scoped attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    /// Remove and return a session-scoped attribute.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.read().len()
    }

    /// Tear the session down: empty the attribute store and mark it inert.
    pub fn clear(&self) {
        let mut attributes = self.attributes.write();
        self.cleared.store(true, Ordering::Release);
        attributes.clear();
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("peer", &self.peer)
            .field("cleared", &self.is_cleared())
            .finish()
    }
}
