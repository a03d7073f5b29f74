//! Protocol capability contract.
//!
//! A [`Protocol`] is a pluggable unit that claims ownership of certain request
//! shapes and produces responses (or errors) for them. Protocols are
//! registered once at startup and treated as an immutable ordered collection
//! for the lifetime of the server; resolution is first-match-wins.

use crate::error::ProcessError;
use crate::session::Session;
use async_trait::async_trait;
use tracing::info;

/// The result of processing one request.
///
/// `Suppress` is the explicit replacement for a "no response" sentinel value:
/// nothing is written back to the connection (fire-and-forget or out-of-band
/// push protocols).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write this response to the connection's outbound path exactly once.
    Respond(String),
    /// Write nothing back for this request.
    Suppress,
}

/// A registered protocol implementation.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Whether this protocol can handle the given request.
    fn supports(&self, request: &str) -> bool;

    /// Process a request against the originating connection's session.
    async fn process(&self, request: &str, session: &Session) -> Result<Outcome, ProcessError>;

    /// Produce a best-effort error response after `process` failed.
    ///
    /// Invoked for both protocol-reported and unexpected failures; returning
    /// [`Outcome::Suppress`] leaves the request unanswered.
    async fn on_error(&self, error: &ProcessError, request: &str) -> Outcome;
}

/// Echo protocol: supports every request and returns it unchanged.
pub struct EchoProtocol;

#[async_trait]
impl Protocol for EchoProtocol {
    fn supports(&self, _request: &str) -> bool {
        true
    }

    async fn process(&self, request: &str, session: &Session) -> Result<Outcome, ProcessError> {
        info!(session = %session.id(), len = request.len(), "Echoing request");
        Ok(Outcome::Respond(request.to_owned()))
    }

    async fn on_error(&self, error: &ProcessError, _request: &str) -> Outcome {
        Outcome::Respond(format!("ERR {error}"))
    }
}
