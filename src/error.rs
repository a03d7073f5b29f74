//! Unified error handling for ipcd.
//!
//! Errors fall into two families: fatal-to-the-connection errors
//! ([`RegistryError`], [`DispatchError`]) which cause the transport layer to
//! close the affected connection, and request-recoverable errors
//! ([`ProtocolError`], wrapped by [`ProcessError`]) which the owning protocol
//! turns into an error response while the connection stays open.

use crate::session::ConnectionId;
use thiserror::Error;

/// Errors raised by the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No session is registered for the given connection. Registration is
    /// synchronous with connect, so hitting this is always an ordering bug
    /// in the transport layer, never a recoverable runtime condition.
    #[error("no session registered for connection {0}")]
    NotFound(ConnectionId),

    /// A connection-created listener rejected the connection. The session
    /// stays registered; the caller is expected to run its normal teardown
    /// path, which performs the disconnect.
    #[error("connection-created listener failed: {0}")]
    Listener(#[source] anyhow::Error),
}

impl RegistryError {
    /// Static error code for log labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "session_not_found",
            Self::Listener(_) => "listener_failed",
        }
    }
}

/// Fatal dispatch errors. Any of these closes the affected connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No registered protocol supports the request. This is a deployment or
    /// compatibility defect, not a per-request failure.
    #[error("no registered protocol supports the request")]
    NoProtocol,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A protocol-reported, request-recoverable failure.
///
/// The owning protocol's `on_error` supplies the user-visible response; the
/// connection remains open.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProtocolError {
    message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of a single `process` invocation.
///
/// Both variants are handled identically for response purposes (the same
/// protocol's `on_error` is asked for a best-effort error response); they
/// differ only in log severity.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_codes() {
        assert_eq!(
            RegistryError::NotFound(ConnectionId::new(7)).error_code(),
            "session_not_found"
        );
        assert_eq!(
            RegistryError::Listener(anyhow::anyhow!("nope")).error_code(),
            "listener_failed"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::new("bad input");
        assert_eq!(err.to_string(), "bad input");
        assert_eq!(err.message(), "bad input");

        let wrapped = ProcessError::from(err);
        assert_eq!(wrapped.to_string(), "protocol error: bad input");
    }

    #[test]
    fn test_dispatch_error_from_registry() {
        let err = DispatchError::from(RegistryError::NotFound(ConnectionId::new(3)));
        assert!(matches!(
            err,
            DispatchError::Registry(RegistryError::NotFound(_))
        ));
    }
}
