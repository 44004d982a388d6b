//! # Network Server
//!
//! Listens for clients and runs one I/O thread per accepted connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       NETWORK SERVER                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   insert   ┌──────────────────────────┐    │
//! │  │ Accept       │───────────▶│ ConnectionSet            │    │
//! │  │ (blocking)   │            │ (re-entrant lock)        │    │
//! │  └──────────────┘            │  #12 ─ I/O thread        │    │
//! │                              │  #13 ─ I/O thread        │    │
//! │  ┌──────────────┐   tick()   │  ...                     │    │
//! │  │ Owner thread │◀──────────▶│                          │    │
//! │  │ (handlers)   │            └──────────────────────────┘    │
//! │  └──────────────┘                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Order
//!
//! For every connected entry: dispatch its inbound packets, then flush its
//! outbound queue. A broadcast made by a handler reaches connections already
//! visited in the same tick on the next tick.

mod connection;
mod listener;

pub use connection::ConnectionIndex;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::connection::ConnectionState;
use crate::context::NetworkContext;
use crate::error::{NetError, NetResult};
use crate::protocol::Packet;
use crate::POLL_INTERVAL_MS;
use connection::ConnectionSet;
use listener::ListenerShared;

/// Name of the accept thread.
const SERVER_THREAD_NAME: &str = "skelanim-net-server";

/// Callback run on the owner thread for each inbound packet of one type.
pub type ServerHandler = Box<dyn FnMut(&ServerOutbox, ConnectionIndex, &mut Packet)>;

/// Send side of a server, usable from inside handlers.
///
/// Cloning is cheap; every clone addresses the same connections.
#[derive(Clone, Debug)]
pub struct ServerOutbox {
    connections: Arc<ConnectionSet>,
}

impl ServerOutbox {
    /// Queues `packet` for the connection with `index`.
    ///
    /// Unknown indices are ignored.
    pub fn send_to(&self, index: ConnectionIndex, packet: &Packet) {
        if !self.connections.send_to(index, packet) {
            tracing::trace!(%index, "send_to unknown connection, packet dropped");
        }
    }

    /// Queues `packet` for every connection. No-op without connections.
    pub fn broadcast(&self, packet: &Packet) {
        let reached = self.connections.broadcast(packet);
        tracing::trace!(reached, packet_type = packet.packet_type(), "broadcast queued");
    }

    /// Counts connections that are currently connected.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.active_count()
    }
}

/// Server side of the networking layer.
pub struct NetworkServer {
    /// Keeps the subsystem up while the server exists.
    _context: NetworkContext,
    /// State shared with the accept thread.
    listener: Arc<ListenerShared>,
    /// Connections, shared with the accept thread and every outbox.
    outbox: ServerOutbox,
    /// Packet type to callback.
    handlers: HashMap<i32, ServerHandler>,
    /// The accept thread, if one was started.
    thread: Option<JoinHandle<()>>,
}

impl NetworkServer {
    /// Creates an idle server.
    #[must_use]
    pub fn new(context: &NetworkContext) -> Self {
        Self {
            _context: context.clone(),
            listener: Arc::new(ListenerShared::new()),
            outbox: ServerOutbox {
                connections: Arc::new(ConnectionSet::new()),
            },
            handlers: HashMap::new(),
            thread: None,
        }
    }

    /// Starts listening on `port` (0 picks a free port) on a background
    /// thread.
    ///
    /// Returns once the thread is running; [`state`](Self::state) turns
    /// `Listening` after the bind succeeds.
    ///
    /// # Errors
    ///
    /// [`NetError::AlreadyRunning`] if the accept thread is active;
    /// [`NetError::Io`] if it cannot be spawned. Nothing changes on error.
    pub fn create_server(&mut self, port: u16) -> NetResult<()> {
        self.start(port, Duration::from_millis(POLL_INTERVAL_MS))
    }

    /// Starts listening with the port and poll interval from `config`.
    ///
    /// # Errors
    ///
    /// Same as [`create_server`](Self::create_server), plus
    /// [`NetError::Config`] if `config` does not validate.
    pub fn create_server_with(&mut self, config: &NetworkConfig) -> NetResult<()> {
        config.validate()?;
        self.start(config.port, config.poll_interval())
    }

    fn start(&mut self, port: u16, poll_interval: Duration) -> NetResult<()> {
        if self.listener.is_running() {
            return Err(NetError::AlreadyRunning("server"));
        }
        self.join_finished();

        self.listener.clear_disconnect();
        self.listener.set_running(true);

        let listener = Arc::clone(&self.listener);
        let connections = Arc::clone(&self.outbox.connections);
        let spawned = thread::Builder::new()
            .name(SERVER_THREAD_NAME.to_owned())
            .spawn(move || listener::run_listener(&listener, &connections, port, poll_interval));

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.listener.set_running(false);
                Err(NetError::Io(err))
            }
        }
    }

    /// Stops accepting, then closes and removes every connection.
    ///
    /// Safe to call at any time, any number of times.
    pub fn release_server(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.listener.request_disconnect();
            if handle.join().is_err() {
                tracing::error!("server accept thread panicked");
                self.listener.set_running(false);
            }
            self.listener.clear_disconnect();
        }
        self.outbox.connections.release_all();
    }

    /// Dispatches inbound packets and flushes outbound ones for every
    /// connected client, then drops connections whose thread has ended.
    ///
    /// Call once per frame from the owning thread.
    pub fn tick(&mut self) {
        let connections = &self.outbox.connections;
        let _held = connections.hold();

        for (index, shared) in connections.connected() {
            while let Some(mut packet) = shared.recv_buffer().read_packet() {
                match self.handlers.get_mut(&packet.packet_type()) {
                    Some(handler) => handler(&self.outbox, index, &mut packet),
                    None => tracing::trace!(
                        %index,
                        packet_type = packet.packet_type(),
                        "no server handler, packet dropped"
                    ),
                }
            }
            connections.flush(index);
        }

        let reaped = connections.reap();
        if reaped > 0 {
            tracing::debug!(reaped, "finished connections removed");
        }
    }

    /// Registers the callback for `packet_type`, replacing any previous one.
    pub fn register_handler<F>(&mut self, packet_type: impl Into<i32>, handler: F)
    where
        F: FnMut(&ServerOutbox, ConnectionIndex, &mut Packet) + 'static,
    {
        self.handlers.insert(packet_type.into(), Box::new(handler));
    }

    /// Queues `packet` for one connection; unknown indices are ignored.
    pub fn send_to(&self, index: ConnectionIndex, packet: &Packet) {
        self.outbox.send_to(index, packet);
    }

    /// Queues `packet` for every connection.
    pub fn broadcast(&self, packet: &Packet) {
        self.outbox.broadcast(packet);
    }

    /// Counts connections that are currently connected.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.outbox.active_connections()
    }

    /// Lists the indices of every tracked connection, oldest first.
    #[must_use]
    pub fn connection_indices(&self) -> Vec<ConnectionIndex> {
        self.outbox.connections.indices()
    }

    /// Returns a handle for sending from outside a handler.
    #[must_use]
    pub fn outbox(&self) -> ServerOutbox {
        self.outbox.clone()
    }

    /// Returns the listener state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.listener.state()
    }

    /// Returns true while the accept thread is active.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Returns the bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Reaps an accept thread that already ended on its own.
    fn join_finished(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("server accept thread panicked");
            }
        }
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.release_server();
    }
}

impl fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkServer")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.outbox.connections)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
