//! ipcd - connection-oriented IPC protocol server core.
//!
//! ipcd accepts inbound stream connections, tracks each connection's session
//! state across its lifetime, dispatches every incoming request to exactly
//! one matching protocol from a registered set, and shuts the listener down
//! gracefully by draining in-flight connections within a bounded timeout.
//!
//! The pieces compose as: [`network::Server`] binds a listener and installs,
//! per accepted connection, the machinery that registers the connection in
//! the [`registry::ConnectionRegistry`] and routes inbound requests through
//! the [`dispatch::Dispatcher`]. Control flows from the transport inward
//! (accept, register, dispatch, respond) and from the lifecycle controller
//! outward at shutdown (signal-close, wait, release).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod session;
