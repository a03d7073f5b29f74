//! ConnectionGroup - the closeable set of open transport connections.
//!
//! The group tracks every open transport-level connection plus the listening
//! socket itself. Members receive a close signal through a watch channel and
//! remove themselves as their tasks finish; `close_all` followed by
//! `wait_drained` is the single "close all, then wait" drain operation used
//! at shutdown.

use crate::session::ConnectionId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// What kind of socket a group member wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Listener,
    Connection,
}

struct Member {
    kind: MemberKind,
    close: watch::Sender<bool>,
    abort: Mutex<Option<AbortHandle>>,
}

/// Concurrently-mutable membership set of open connections.
#[derive(Default)]
pub struct ConnectionGroup {
    members: DashMap<ConnectionId, Member>,
    drained: Notify,
}

impl ConnectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the listening socket to the group.
    pub fn add_listener(&self, id: ConnectionId) -> watch::Receiver<bool> {
        self.add(id, MemberKind::Listener)
    }

    /// Add an accepted connection to the group. Called at the moment the
    /// connection becomes open, before its task is spawned, so no accepted
    /// connection is missed by a concurrent `close_all`.
    pub fn add_connection(&self, id: ConnectionId) -> watch::Receiver<bool> {
        self.add(id, MemberKind::Connection)
    }

    fn add(&self, id: ConnectionId, kind: MemberKind) -> watch::Receiver<bool> {
        let (close_tx, close_rx) = watch::channel(false);
        debug!(connection = %id, ?kind, "Adding member to group");
        self.members.insert(
            id,
            Member {
                kind,
                close: close_tx,
                abort: Mutex::new(None),
            },
        );
        close_rx
    }

    /// Attach the task abort handle for a member, once its task is spawned.
    /// Used only by the force-release path of dispose.
    pub fn set_abort(&self, id: ConnectionId, handle: AbortHandle) {
        if let Some(member) = self.members.get(&id) {
            *member.abort.lock() = Some(handle);
        }
    }

    /// Remove a member after its socket is closed.
    pub fn remove(&self, id: ConnectionId) {
        if self.members.remove(&id).is_some() {
            trace!(connection = %id, "Removed member from group");
            self.drained.notify_waiters();
        }
    }

    /// Signal close to every member, including the listening socket.
    pub fn close_all(&self) {
        for member in self.members.iter() {
            debug!(connection = %member.key(), kind = ?member.kind, "Closing member");
            let _ = member.close.send(true);
        }
    }

    /// Wait until every member has closed and removed itself, or the timeout
    /// elapses. Returns true if the group drained in time.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                // Register the waiter before checking emptiness so a removal
                // in between cannot be missed.
                let mut notified = std::pin::pin!(self.drained.notified());
                notified.as_mut().enable();
                if self.members.is_empty() {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Abort every remaining member task. Final resort during dispose, after
    /// the drain timeout elapsed.
    pub fn abort_all(&self) {
        for member in self.members.iter() {
            if let Some(handle) = member.abort.lock().take() {
                handle.abort();
            }
        }
        self.members.clear();
        self.drained.notify_waiters();
    }

    /// Total members, listening socket included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Currently open connections, excluding the listening socket.
    pub fn open_connections(&self) -> usize {
        self.members.len().saturating_sub(1)
    }
}
