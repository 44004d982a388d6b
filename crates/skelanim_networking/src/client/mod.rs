//! # Network Client
//!
//! One outbound TCP connection serviced by a dedicated I/O thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌───────────────────────────────┐
//! │ OWNER THREAD             │          │ I/O THREAD (skelanim-net-...) │
//! │                          │          │                               │
//! │ send_to_server ─▶ outbox │  tick()  │  resolve ─▶ connect ─▶ ready? │
//! │                    │─────┼─────────▶│  send_pass / recv_pass        │
//! │ handlers ◀─────────┼─────┼──────────│  error? sleep, retry          │
//! └──────────────────────────┘          └───────────────────────────────┘
//! ```
//!
//! ## Retry Policy
//!
//! Up to `max_retries + 1` attempts. Every fatal error closes the socket and,
//! while attempts remain, waits `retry_interval` before the next one. A
//! disconnect request ends the thread at the next check, including during
//! the wait.

use mio::net::TcpStream;
use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::connection::{ConnectionShared, ConnectionState, SocketLink};
use crate::context::NetworkContext;
use crate::error::{NetError, NetResult};
use crate::protocol::Packet;

/// Name of the client I/O thread.
const CLIENT_THREAD_NAME: &str = "skelanim-net-client";

/// Callback run on the owner thread for each inbound packet of one type.
pub type ClientHandler = Box<dyn FnMut(&mut Packet, &mut Outbox)>;

/// Packets waiting to be flushed to the send buffer on the next tick.
///
/// Handlers receive the outbox so they can reply from inside a tick; those
/// replies go out in the same tick.
#[derive(Debug, Default)]
pub struct Outbox {
    packets: Vec<Packet>,
}

impl Outbox {
    /// Queues a packet for the server.
    pub fn send(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    /// Returns the number of queued packets.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Client side of the networking layer.
pub struct NetworkClient {
    /// Keeps the subsystem up while the client exists.
    _context: NetworkContext,
    /// State shared with the I/O thread.
    shared: Arc<ConnectionShared>,
    /// Owner-thread queue, flushed by `tick()`.
    outbox: Outbox,
    /// Packet type to callback.
    handlers: HashMap<i32, ClientHandler>,
    /// The I/O thread, if one was started.
    thread: Option<JoinHandle<()>>,
}

impl NetworkClient {
    /// Creates an idle client.
    #[must_use]
    pub fn new(context: &NetworkContext) -> Self {
        Self {
            _context: context.clone(),
            shared: Arc::new(ConnectionShared::new()),
            outbox: Outbox::default(),
            handlers: HashMap::new(),
            thread: None,
        }
    }

    /// Starts connecting to `host:port` on a background thread.
    ///
    /// Returns as soon as the thread is running; the connection itself is
    /// reported through [`state`](Self::state).
    ///
    /// # Errors
    ///
    /// [`NetError::AlreadyRunning`] if a connection thread is active,
    /// [`NetError::Config`] for an invalid configuration, [`NetError::Io`] if
    /// the poller or the thread cannot be created. Nothing changes on error.
    pub fn create_client(
        &mut self,
        host: &str,
        port: u16,
        retry_interval_ms: u64,
        max_retries: u32,
    ) -> NetResult<()> {
        let config = NetworkConfig {
            host: host.to_owned(),
            port,
            retry_interval_ms,
            max_retries,
            ..NetworkConfig::default()
        };
        self.create_client_with(&config)
    }

    /// Starts connecting with every parameter taken from `config`.
    ///
    /// # Errors
    ///
    /// Same as [`create_client`](Self::create_client).
    pub fn create_client_with(&mut self, config: &NetworkConfig) -> NetResult<()> {
        if self.shared.is_running() {
            return Err(NetError::AlreadyRunning("client"));
        }
        config.validate()?;
        self.join_finished();

        let link = SocketLink::new(Arc::clone(&self.shared), config.poll_interval())?;
        self.shared.clear_disconnect();
        self.shared.set_running(true);

        let config = config.clone();
        let spawned = thread::Builder::new()
            .name(CLIENT_THREAD_NAME.to_owned())
            .spawn(move || run_client(link, &config));

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.set_running(false);
                Err(NetError::Io(err))
            }
        }
    }

    /// Disconnects and waits for the I/O thread to exit.
    ///
    /// Safe to call at any time, any number of times.
    pub fn release_client(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.request_disconnect();
        if handle.join().is_err() {
            tracing::error!("client I/O thread panicked");
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared.set_running(false);
        }
        self.shared.clear_disconnect();
    }

    /// Dispatches inbound packets, then flushes queued outbound packets.
    ///
    /// Call once per frame from the owning thread. Packets with no
    /// registered handler are dropped.
    pub fn tick(&mut self) {
        let recv = self.shared.recv_buffer();
        while let Some(mut packet) = recv.read_packet() {
            match self.handlers.get_mut(&packet.packet_type()) {
                Some(handler) => handler(&mut packet, &mut self.outbox),
                None => tracing::trace!(
                    packet_type = packet.packet_type(),
                    "no client handler, packet dropped"
                ),
            }
        }

        if self.outbox.is_empty() {
            return;
        }
        let packets = &mut self.outbox.packets;
        self.shared.send_buffer().atomically(|send| {
            for packet in packets.drain(..) {
                send.write_packet(&packet);
            }
        });
        self.shared.wake();
    }

    /// Registers the callback for `packet_type`, replacing any previous one.
    pub fn register_handler<F>(&mut self, packet_type: impl Into<i32>, handler: F)
    where
        F: FnMut(&mut Packet, &mut Outbox) + 'static,
    {
        self.handlers.insert(packet_type.into(), Box::new(handler));
    }

    /// Queues a packet; it reaches the send buffer on the next tick.
    pub fn send_to_server(&mut self, packet: Packet) {
        self.outbox.send(packet);
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns true while the I/O thread is active.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Returns true once data can flow.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the number of packets queued but not yet flushed.
    #[inline]
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbox.len()
    }

    /// Reaps a thread that already ended on its own.
    fn join_finished(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("client I/O thread panicked");
            }
        }
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.release_client();
    }
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkClient")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("pending_outbound", &self.pending_outbound())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Body of the client I/O thread.
fn run_client(mut link: SocketLink, config: &NetworkConfig) {
    let attempts = config.max_retries.saturating_add(1);
    tracing::info!(host = %config.host, port = config.port, "client started");

    for attempt in 1..=attempts {
        if link.shared().disconnect_requested() {
            break;
        }
        link.shared().clear_buffers();

        match run_session(&mut link, config) {
            Ok(()) => break,
            Err(err) => {
                tracing::warn!(attempt, attempts, code = err.code(), "client connection failed: {err}");
            }
        }

        if attempt < attempts {
            tracing::debug!(retry_in_ms = config.retry_interval_ms, "client retrying");
            if !wait_for_retry(link.shared(), config.retry_interval(), config.poll_interval()) {
                break;
            }
        }
    }

    let shared = link.shared();
    shared.set_state(ConnectionState::Disconnected);
    shared.clear_disconnect();
    shared.set_running(false);
    tracing::info!("client stopped");
}

/// One connect attempt and, if it succeeds, the transfer loop.
///
/// `Ok` means a requested disconnect closed the connection cleanly.
fn run_session(link: &mut SocketLink, config: &NetworkConfig) -> NetResult<()> {
    let addr = resolve(&config.host, config.port)?;
    let stream = TcpStream::connect(addr)?;
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!("TCP_NODELAY not set: {err}");
    }
    link.attach(stream, ConnectionState::Establishing)?;
    tracing::debug!(%addr, "connecting");

    let started = Instant::now();
    loop {
        if link.shared().disconnect_requested() {
            return close_requested(link);
        }
        if link.poll_established(started, config.connect_timeout())? == ConnectionState::Connected {
            break;
        }
        link.wait_ready(0)?;
    }
    tracing::info!(%addr, "connected to server");

    loop {
        if link.shared().disconnect_requested() {
            return close_requested(link);
        }
        let moved = link.pump()?;
        link.wait_ready(moved)?;
    }
}

/// Resolves `host:port` to its first address.
fn resolve(host: &str, port: u16) -> NetResult<SocketAddr> {
    let failed = || NetError::AddressResolution {
        host: host.to_owned(),
        port,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|err| {
            tracing::debug!("resolve {host}:{port}: {err}");
            failed()
        })?
        .next()
        .ok_or_else(failed)
}

/// Closes on request; a failing shutdown is logged, not retried.
fn close_requested(link: &mut SocketLink) -> NetResult<()> {
    if let Err(err) = link.close() {
        tracing::debug!("close on disconnect: {err}");
    }
    tracing::info!("client disconnected");
    Ok(())
}

/// Sleeps up to `interval`, waking early on a disconnect request.
///
/// Returns false if the wait was cut short.
fn wait_for_retry(shared: &ConnectionShared, interval: Duration, step: Duration) -> bool {
    let step = step.max(Duration::from_millis(1));
    let deadline = Instant::now() + interval;
    loop {
        if shared.disconnect_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(step.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_queue() {
        let mut outbox = Outbox::default();
        assert!(outbox.is_empty());
        outbox.send(Packet::new(1));
        outbox.send(Packet::new(2));
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_resolve_numeric() {
        let addr = resolve("127.0.0.1", 4000).unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_resolve_failure() {
        let err = resolve("not a host name", 4000).unwrap_err();
        assert!(matches!(err, NetError::AddressResolution { port: 4000, .. }));
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_retry_wait_interrupted() {
        let shared = ConnectionShared::new();
        shared.request_disconnect();
        let started = Instant::now();
        assert!(!wait_for_retry(&shared, Duration::from_secs(10), Duration::from_millis(2)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_retry_wait_elapses() {
        let shared = ConnectionShared::new();
        assert!(wait_for_retry(&shared, Duration::from_millis(10), Duration::ZERO));
    }
}
