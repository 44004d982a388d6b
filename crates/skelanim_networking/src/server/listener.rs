//! # Listener
//!
//! The accept thread: binds, listens, and turns each accepted socket into a
//! [`ServerConnection`] with its own I/O thread.
//!
//! ## Waking a Blocked Accept
//!
//! `accept()` blocks. To stop the thread the owner sets the disconnect flag,
//! shuts down a clone of the listening socket, and makes one throwaway
//! loopback connection. Whichever wakes the accept first, the loop sees the
//! flag and exits.

use mio::net::TcpStream;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::connection::{ConnectionIndex, ConnectionSet, ServerConnection};
use crate::connection::{AtomicConnectionState, ConnectionState};
use crate::error::NetResult;

/// Pending connections the kernel may queue.
const LISTEN_BACKLOG: i32 = 128;

/// How long the loopback wake-up connect may take.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// State shared between the server owner and the accept thread.
#[derive(Debug, Default)]
pub(crate) struct ListenerShared {
    state: AtomicConnectionState,
    running: AtomicBool,
    disconnect: AtomicBool,
    /// Clone of the listening socket, kept for shutdown.
    socket: Mutex<Option<Socket>>,
    /// Bound address once listening.
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ListenerShared {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        self.state.load()
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear_disconnect(&self) {
        self.disconnect.store(false, Ordering::Release);
    }

    #[inline]
    fn disconnect_requested(&self) -> bool {
        self.disconnect.load(Ordering::Acquire)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Asks the accept thread to stop and unblocks its `accept()`.
    pub(crate) fn request_disconnect(&self) {
        self.disconnect.store(true, Ordering::Release);

        if let Some(socket) = self.socket.lock().take() {
            if let Err(err) = socket.shutdown(Shutdown::Both) {
                tracing::trace!("listener shutdown: {err}");
            }
        }
        if let Some(addr) = self.local_addr() {
            let wake = SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()));
            if let Err(err) = std::net::TcpStream::connect_timeout(&wake, WAKE_TIMEOUT) {
                tracing::trace!("listener wake-up connect: {err}");
            }
        }
    }

    /// Publishes a bound listener; returns false if a stop was already
    /// requested, in which case the caller must not block in `accept()`.
    fn publish(&self, socket: &Socket, addr: SocketAddr) -> bool {
        let mut slot = self.socket.lock();
        match socket.try_clone() {
            Ok(clone) => *slot = Some(clone),
            Err(err) => tracing::debug!("listener clone failed: {err}"),
        }
        *self.local_addr.lock() = Some(addr);
        drop(slot);
        !self.disconnect_requested()
    }

    fn withdraw(&self) {
        self.socket.lock().take();
        self.local_addr.lock().take();
    }
}

/// Opens `0.0.0.0:port` with address reuse and starts listening.
pub(crate) fn bind(port: u16) -> NetResult<Socket> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket)
}

/// Body of the accept thread.
pub(crate) fn run_listener(
    shared: &ListenerShared,
    connections: &ConnectionSet,
    port: u16,
    poll_interval: Duration,
) {
    let socket = match bind(port) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::warn!(port, code = err.code(), "server bind failed: {err}");
            finish(shared);
            return;
        }
    };
    let local = socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket())
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));

    shared.state.store(ConnectionState::Listening);
    if !shared.publish(&socket, local) {
        drop(socket);
        finish(shared);
        return;
    }
    tracing::info!(addr = %local, "server listening");

    loop {
        match socket.accept() {
            Ok((accepted, peer)) => {
                if shared.disconnect_requested() {
                    drop(accepted);
                    break;
                }
                let peer = peer.as_socket();
                if let Err(err) = admit(accepted, connections, poll_interval) {
                    tracing::warn!(?peer, code = err.code(), "failed to admit connection: {err}");
                }
            }
            Err(err) => {
                if !shared.disconnect_requested() {
                    tracing::warn!(code = err.raw_os_error(), "accept failed: {err}");
                }
                break;
            }
        }
    }

    drop(socket);
    finish(shared);
}

/// Makes an accepted socket non-blocking and registers it.
fn admit(accepted: Socket, connections: &ConnectionSet, poll_interval: Duration) -> NetResult<()> {
    let stream: std::net::TcpStream = accepted.into();
    stream.set_nonblocking(true)?;
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!("TCP_NODELAY not set: {err}");
    }

    let index = ConnectionIndex::next();
    let connection = ServerConnection::spawn(index, TcpStream::from_std(stream), poll_interval)?;
    connections.insert(connection);
    tracing::debug!(%index, "connection accepted");
    Ok(())
}

/// Final bookkeeping when the accept thread exits.
fn finish(shared: &ListenerShared) {
    shared.withdraw();
    shared.state.store(ConnectionState::Disconnected);
    shared.clear_disconnect();
    shared.set_running(false);
    tracing::info!("server stopped listening");
}
