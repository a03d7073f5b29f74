//! Connection - handles an individual client connection.
//!
//! Each Connection runs in its own Tokio task: registration with the
//! ConnectionRegistry happens synchronously on connect, then a single
//! `select!` loop consumes inbound frames and the group's close signal as
//! discrete events. Because one task owns the socket, a connection's requests
//! are processed (and answered) strictly in arrival order; concurrency exists
//! only across connections.
//!
//! Error policy, inward to outward:
//! - transport/framing errors close the connection without consulting any
//!   protocol;
//! - fatal dispatch errors (no protocol, missing session) close the
//!   connection;
//! - protocol-level failures were already converted to an error response by
//!   the dispatcher and do not end the loop.

use crate::dispatch::Dispatcher;
use crate::protocol::Outcome;
use crate::registry::ConnectionRegistry;
use crate::session::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, instrument, trace, warn};

/// A client connection handler.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    framed: Framed<TcpStream, LinesCodec>,
    closed: watch::Receiver<bool>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        max_frame_length: usize,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            addr,
            registry,
            dispatcher,
            framed: Framed::new(stream, LinesCodec::new_with_max_length(max_frame_length)),
            closed,
        }
    }

    /// Run the connection: register, serve frames until close, unregister.
    #[instrument(skip(self), fields(connection = %self.id, addr = %self.addr), name = "connection")]
    pub async fn run(mut self) -> anyhow::Result<()> {
        match self.registry.on_connect(self.id, self.addr) {
            Ok(session) => {
                debug!(session = %session.id(), "Client connected");
                self.serve().await;
            }
            Err(e) => {
                warn!(error = %e, "Connection rejected by lifecycle listener");
            }
        }

        // Teardown always runs, whether the connection served requests or was
        // rejected right after registration.
        match self.registry.on_disconnect(self.id) {
            Ok(_) => info!("Client disconnected"),
            Err(e) => error!(error = %e, "Disconnect for unregistered connection"),
        }

        Ok(())
    }

    async fn serve(&mut self) {
        loop {
            tokio::select! {
                _ = self.closed.changed() => {
                    debug!("Close requested by connection group");
                    break;
                }
                frame = self.framed.next() => match frame {
                    Some(Ok(request)) => {
                        if !self.handle_request(&request).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        // Transport-level fault (framing or I/O): close
                        // immediately, no protocol is consulted.
                        error!(error = %e, "Transport error - closing connection");
                        break;
                    }
                    None => {
                        debug!("Peer closed connection");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch one request and publish its result. Returns false when the
    /// connection must close.
    async fn handle_request(&mut self, request: &str) -> bool {
        match self.dispatcher.dispatch(self.id, request).await {
            Ok(Outcome::Respond(response)) => {
                trace!(len = response.len(), "Writing response");
                if let Err(e) = self.framed.send(response).await {
                    warn!(error = %e, "Write error - closing connection");
                    return false;
                }
                true
            }
            Ok(Outcome::Suppress) => {
                trace!("Omitting response as requested by protocol");
                true
            }
            Err(e) => {
                error!(error = %e, "Fatal dispatch error - closing connection");
                false
            }
        }
    }
}
