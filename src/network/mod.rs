//! Network module.
//!
//! Contains the Server lifecycle controller, the per-connection handler, and
//! the closeable connection group.

mod connection;
mod group;
mod server;

pub use server::{DisposeHook, Server, ServerHandle};
