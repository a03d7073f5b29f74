//! Dispatcher - routes one inbound request to the correct protocol.
//!
//! Per-message flow: resolve the protocol (first registered protocol whose
//! `supports` returns true), resolve the originating connection's session,
//! invoke `process`, and surface the outcome. Handler failures are recovered
//! through the same protocol's `on_error`; resolution failures are fatal to
//! the connection and returned as [`DispatchError`].
//!
//! The protocol list is read-only and shared lock-free across connections;
//! ordering within a connection is preserved by the per-connection task, not
//! here.

use crate::error::{DispatchError, ProcessError};
use crate::protocol::{Outcome, Protocol};
use crate::registry::ConnectionRegistry;
use crate::session::ConnectionId;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Routes inbound requests to registered protocols.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    protocols: Box<[Arc<dyn Protocol>]>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, protocols: Vec<Arc<dyn Protocol>>) -> Self {
        Self {
            registry,
            protocols: protocols.into_boxed_slice(),
        }
    }

    /// Dispatch one request from the given connection.
    ///
    /// An `Err` is fatal to the connection; an `Ok` outcome is either a
    /// response to write back exactly once or an explicit suppression.
    pub async fn dispatch(
        &self,
        id: ConnectionId,
        request: &str,
    ) -> Result<Outcome, DispatchError> {
        let protocol = self
            .protocols
            .iter()
            .find(|p| p.supports(request))
            .ok_or(DispatchError::NoProtocol)?;

        let session = self.registry.get(id)?;

        trace!(connection = %id, len = request.len(), "Processing request");
        let outcome = match protocol.process(request, &session).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    ProcessError::Protocol(e) => {
                        warn!(connection = %id, error = %e, "Error in protocol");
                    }
                    ProcessError::Unexpected(e) => {
                        error!(connection = %id, error = %e, "Unexpected error in protocol");
                    }
                }
                protocol.on_error(&err, request).await
            }
        };

        Ok(outcome)
    }

    /// Number of registered protocols.
    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }
}
