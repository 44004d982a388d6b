//! # Server Connections
//!
//! Accepted connections, each serviced by its own I/O thread, and the
//! locked set the server keeps them in.
//!
//! ## Design
//!
//! - Indices come from one process-wide counter and are never reused
//! - The set sits behind a re-entrant lock so handlers running inside
//!   `tick()` can call back into it
//! - `RefCell` borrows never outlive a single method call

use mio::net::TcpStream;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::connection::{ConnectionShared, ConnectionState, SocketLink};
use crate::error::{NetError, NetResult};
use crate::protocol::Packet;
use crate::FIRST_CONNECTION_INDEX;

/// Next index to hand out.
static NEXT_CONNECTION_INDEX: AtomicI32 = AtomicI32::new(FIRST_CONNECTION_INDEX);

/// Server-assigned identifier of an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionIndex(pub i32);

impl ConnectionIndex {
    /// Claims the next unused index.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_INDEX.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ConnectionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One accepted connection as seen from the owner thread.
pub(crate) struct ServerConnection {
    index: ConnectionIndex,
    shared: Arc<ConnectionShared>,
    /// Owner-thread queue, flushed during `tick()`.
    outbound: Vec<Packet>,
    thread: Option<JoinHandle<()>>,
}

impl ServerConnection {
    /// Wraps an accepted socket and starts its I/O thread.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the poller or the thread cannot be
    /// created.
    pub(crate) fn spawn(
        index: ConnectionIndex,
        stream: TcpStream,
        poll_interval: Duration,
    ) -> NetResult<Self> {
        let shared = Arc::new(ConnectionShared::new());
        let mut link = SocketLink::new(Arc::clone(&shared), poll_interval)?;
        link.attach(stream, ConnectionState::Connected)?;
        shared.set_running(true);

        let thread = thread::Builder::new()
            .name(format!("skelanim-net-conn-{index}"))
            .spawn(move || run_connection(link, index))
            .map_err(|err| {
                shared.set_running(false);
                shared.set_state(ConnectionState::Disconnected);
                NetError::Io(err)
            })?;

        Ok(Self {
            index,
            shared,
            outbound: Vec::new(),
            thread: Some(thread),
        })
    }

    #[inline]
    pub(crate) fn index(&self) -> ConnectionIndex {
        self.index
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns true once the I/O thread has stopped on its own.
    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        !self.shared.is_running()
    }

    /// Queues a packet for the next flush.
    pub(crate) fn send(&mut self, packet: Packet) {
        self.outbound.push(packet);
    }

    /// Moves queued packets into the send buffer as one step.
    pub(crate) fn flush(&mut self) {
        if self.outbound.is_empty() {
            return;
        }
        let packets = &mut self.outbound;
        self.shared.send_buffer().atomically(|send| {
            for packet in packets.drain(..) {
                send.write_packet(&packet);
            }
        });
        self.shared.wake();
    }

    /// Stops the I/O thread and waits for it. Idempotent.
    pub(crate) fn release(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.request_disconnect();
        if handle.join().is_err() {
            tracing::error!(index = %self.index, "connection thread panicked");
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared.set_running(false);
        }
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Body of a per-connection I/O thread.
fn run_connection(mut link: SocketLink, index: ConnectionIndex) {
    tracing::info!(%index, "connection opened");

    let outcome = loop {
        if link.shared().disconnect_requested() {
            break link.close();
        }
        if let Err(err) = link.pump().and_then(|moved| link.wait_ready(moved)) {
            break Err(err);
        }
    };

    match outcome {
        Ok(()) => tracing::info!(%index, "connection closed"),
        Err(NetError::ConnectionClosed) => tracing::info!(%index, "connection closed by peer"),
        Err(err) => tracing::warn!(%index, code = err.code(), "connection failed: {err}"),
    }

    let shared = link.shared();
    shared.set_state(ConnectionState::Disconnected);
    shared.clear_disconnect();
    shared.set_running(false);
}

/// Every live connection of one server, behind a re-entrant lock.
#[derive(Default)]
pub(crate) struct ConnectionSet {
    connections: ReentrantMutex<RefCell<Vec<ServerConnection>>>,
}

impl ConnectionSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Holds the lock so a sequence of calls sees no concurrent insert.
    pub(crate) fn hold(&self) -> ReentrantMutexGuard<'_, RefCell<Vec<ServerConnection>>> {
        self.connections.lock()
    }

    pub(crate) fn insert(&self, connection: ServerConnection) {
        self.connections.lock().borrow_mut().push(connection);
    }

    /// Queues `packet` on the connection with `index`.
    ///
    /// Returns false if no such connection exists.
    pub(crate) fn send_to(&self, index: ConnectionIndex, packet: &Packet) -> bool {
        let guard = self.connections.lock();
        let mut connections = guard.borrow_mut();
        match connections.iter_mut().find(|c| c.index() == index) {
            Some(connection) => {
                connection.send(packet.clone());
                true
            }
            None => false,
        }
    }

    /// Queues `packet` on every connection. Returns how many got it.
    pub(crate) fn broadcast(&self, packet: &Packet) -> usize {
        let guard = self.connections.lock();
        let mut connections = guard.borrow_mut();
        for connection in connections.iter_mut() {
            connection.send(packet.clone());
        }
        connections.len()
    }

    /// Counts connections in `Connected`.
    pub(crate) fn active_count(&self) -> usize {
        let guard = self.connections.lock();
        let connections = guard.borrow();
        connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .count()
    }

    /// Lists every index in the set, in accept order.
    pub(crate) fn indices(&self) -> Vec<ConnectionIndex> {
        let guard = self.connections.lock();
        let connections = guard.borrow();
        connections.iter().map(ServerConnection::index).collect()
    }

    /// Snapshot of the connected entries for dispatch.
    pub(crate) fn connected(&self) -> Vec<(ConnectionIndex, Arc<ConnectionShared>)> {
        let guard = self.connections.lock();
        let connections = guard.borrow();
        connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .map(|c| (c.index(), Arc::clone(&c.shared)))
            .collect()
    }

    /// Flushes the outbound queue of `index`, if it is still present.
    pub(crate) fn flush(&self, index: ConnectionIndex) {
        let guard = self.connections.lock();
        let mut connections = guard.borrow_mut();
        if let Some(connection) = connections.iter_mut().find(|c| c.index() == index) {
            connection.flush();
        }
    }

    /// Joins and removes connections whose thread has stopped.
    ///
    /// Returns the number removed.
    pub(crate) fn reap(&self) -> usize {
        let guard = self.connections.lock();
        let finished: Vec<ServerConnection> = {
            let mut connections = guard.borrow_mut();
            let (finished, live): (Vec<_>, Vec<_>) =
                connections.drain(..).partition(ServerConnection::is_finished);
            *connections = live;
            finished
        };
        for connection in &finished {
            tracing::debug!(index = %connection.index(), "connection removed");
        }
        finished.len()
    }

    /// Stops and removes every connection.
    pub(crate) fn release_all(&self) {
        let guard = self.connections.lock();
        let connections = std::mem::take(&mut *guard.borrow_mut());
        for mut connection in connections {
            connection.release();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.lock().borrow().len()
    }
}

impl fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("len", &self.len())
            .finish()
    }
}
