//! Server - binds the listening socket and orchestrates lifecycle.
//!
//! [`Server::start`] is the post-start hook: it applies the configured
//! transport options, binds, adds the listening socket to the
//! [`ConnectionGroup`], and spawns the accept loop. [`ServerHandle::stop`] is
//! the pre-stop hook: it signals close to every group member (listening
//! socket included) and waits up to the configured timeout for the drain to
//! complete. [`ServerHandle::dispose`] releases everything that remains,
//! exactly once, even when a preceding deregistration hook fails.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::network::connection::Connection;
use crate::network::group::ConnectionGroup;
use crate::protocol::Protocol;
use crate::registry::ConnectionRegistry;
use crate::session::{ConnectionId, ConnectionIdGenerator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

const DEFAULT_BACKLOG: u32 = 1024;

/// Fallible cleanup step run during dispose (observability deregistration
/// and the like).
pub type DisposeHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// The server lifecycle controller.
pub struct Server;

impl Server {
    /// Bind the configured address and start accepting connections.
    pub async fn start(
        config: &Config,
        registry: Arc<ConnectionRegistry>,
        protocols: Vec<Arc<dyn Protocol>>,
    ) -> anyhow::Result<ServerHandle> {
        let options = ListenerOptions::parse(&config.transport.options);
        let listener = bind(config.listen.address, &options)?;
        let local_addr = listener.local_addr()?;
        info!(service = %config.service.name, addr = %local_addr, "Listener bound");

        let ids = Arc::new(ConnectionIdGenerator::new());
        let group = Arc::new(ConnectionGroup::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), protocols));

        // The listening socket itself is a member of the group.
        let listener_id = ids.next();
        let listener_closed = group.add_listener(listener_id);

        let accept = AcceptLoop {
            listener,
            listener_id,
            closed: listener_closed,
            ids,
            group: Arc::clone(&group),
            registry,
            dispatcher,
            max_frame_length: config.transport.max_frame_length,
            nodelay: options.nodelay,
        };
        let accept_task = tokio::spawn(accept.run());
        group.set_abort(listener_id, accept_task.abort_handle());

        Ok(ServerHandle {
            name: config.service.name.clone(),
            local_addr,
            group,
            shutdown_timeout: config.shutdown.timeout(),
            disposed: AtomicBool::new(false),
            dispose_hooks: Mutex::new(Vec::new()),
        })
    }
}

/// Handle to a running server: observability surface plus the stop/dispose
/// lifecycle hooks.
pub struct ServerHandle {
    name: String,
    local_addr: SocketAddr,
    group: Arc<ConnectionGroup>,
    shutdown_timeout: Duration,
    disposed: AtomicBool,
    dispose_hooks: Mutex<Vec<DisposeHook>>,
}

impl ServerHandle {
    /// Logical service name (observability label).
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// The address the listener actually bound (resolves ephemeral ports).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Point-in-time count of open connections, listening socket excluded.
    pub fn open_connections(&self) -> usize {
        self.group.open_connections()
    }

    /// Register a cleanup step to run during [`dispose`](Self::dispose).
    pub fn on_dispose(&self, hook: DisposeHook) {
        self.dispose_hooks.lock().push(hook);
    }

    /// Drain: close every member of the connection group and wait, up to the
    /// configured timeout, for the close to complete. Returns whether all
    /// connections closed in time.
    pub async fn stop(&self) -> bool {
        info!(
            service = %self.name,
            timeout = ?self.shutdown_timeout,
            "Waiting for connections to close"
        );
        self.group.close_all();
        let drained = self.group.wait_drained(self.shutdown_timeout).await;
        if drained {
            info!(service = %self.name, "All connections closed");
        } else {
            warn!(
                service = %self.name,
                remaining = self.group.len(),
                "Drain timeout elapsed with connections still open"
            );
        }
        drained
    }

    /// Release remaining transport resources, exactly once.
    ///
    /// Dispose hooks run first; a failing hook is logged and never prevents
    /// the final release from executing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            debug!(service = %self.name, "Dispose already ran");
            return;
        }

        let hooks = std::mem::take(&mut *self.dispose_hooks.lock());
        for hook in hooks {
            if let Err(e) = hook() {
                warn!(service = %self.name, error = %e, "Dispose hook failed");
            }
        }

        // Final release always executes, regardless of hook outcomes.
        self.group.abort_all();
        info!(service = %self.name, "Transport resources released");
    }
}

/// Accepts inbound connections until the listening socket is closed.
struct AcceptLoop {
    listener: TcpListener,
    listener_id: ConnectionId,
    closed: watch::Receiver<bool>,
    ids: Arc<ConnectionIdGenerator>,
    group: Arc<ConnectionGroup>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    max_frame_length: usize,
    nodelay: Option<bool>,
}

impl AcceptLoop {
    #[instrument(skip(self), fields(listener = %self.listener_id), name = "accept")]
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.closed.changed() => {
                    info!("Listener close requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }

        // Dropping the listener releases the socket; the group entry goes
        // with it so drain waiters can make progress.
        self.group.remove(self.listener_id);
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Some(nodelay) = self.nodelay
            && let Err(e) = stream.set_nodelay(nodelay)
        {
            warn!(%addr, error = %e, "Failed to set nodelay");
        }

        let id = self.ids.next();
        info!(connection = %id, %addr, "Connection accepted");

        // Group membership is established while still on the accept path so
        // a concurrent close_all cannot miss this connection.
        let closed = self.group.add_connection(id);

        let connection = Connection::new(
            id,
            stream,
            addr,
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            self.max_frame_length,
            closed,
        );

        let group = Arc::clone(&self.group);
        let task = tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                error!(connection = %id, %addr, error = %e, "Connection error");
            }
            group.remove(id);
        });
        self.group.set_abort(id, task.abort_handle());
    }
}

/// Transport options recognized by the listener, parsed from the verbatim
/// key/value map in the configuration.
#[derive(Debug, Default, PartialEq, Eq)]
struct ListenerOptions {
    reuseaddr: Option<bool>,
    recv_buffer_size: Option<u32>,
    send_buffer_size: Option<u32>,
    backlog: Option<u32>,
    nodelay: Option<bool>,
}

impl ListenerOptions {
    fn parse(options: &HashMap<String, String>) -> Self {
        let mut parsed = Self::default();
        for (key, value) in options {
            trace!(key = %key, value = %value, "Setting option");
            match key.as_str() {
                "reuseaddr" => parsed.reuseaddr = parse_flag(key, value),
                "recv_buffer_size" => parsed.recv_buffer_size = parse_number(key, value),
                "send_buffer_size" => parsed.send_buffer_size = parse_number(key, value),
                "backlog" => parsed.backlog = parse_number(key, value),
                "nodelay" => parsed.nodelay = parse_flag(key, value),
                _ => warn!(key = %key, "Unknown transport option - skipping"),
            }
        }
        parsed
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => {
            warn!(key = %key, value = %value, "Invalid boolean transport option - skipping");
            None
        }
    }
}

fn parse_number(key: &str, value: &str) -> Option<u32> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key = %key, value = %value, "Invalid numeric transport option - skipping");
            None
        }
    }
}

fn bind(addr: SocketAddr, options: &ListenerOptions) -> anyhow::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if let Some(reuseaddr) = options.reuseaddr {
        socket.set_reuseaddr(reuseaddr)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    socket.bind(addr)?;
    let listener = socket.listen(options.backlog.unwrap_or(DEFAULT_BACKLOG))?;
    Ok(listener)
}
