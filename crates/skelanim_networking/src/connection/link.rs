//! # Socket Link
//!
//! The I/O-thread half of a connection: owns the non-blocking socket and
//! moves bytes between it and the shared ring buffers.
//!
//! ## Pass Semantics
//!
//! - A pass performs at most one `read` or one `write` of up to
//!   [`IO_CHUNK_SIZE`](crate::IO_CHUNK_SIZE) bytes.
//! - "Would block" is `Ok(IoStatus::Blocked)`, never an error.
//! - Any other failure closes the socket before the error is returned.
//! - Ring buffer locks are held only for the copy, never across a socket call.
//!
//! ## Readiness
//!
//! Each link owns a `mio::Poll` with the socket registered for reads and
//! writes. Between idle passes the thread blocks in [`SocketLink::wait_ready`]
//! until the socket turns readable or writable, the owner wakes it, or the
//! poll interval runs out.

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{ConnectionShared, ConnectionState};
use crate::error::{IoStatus, NetError, NetResult};
use crate::IO_CHUNK_SIZE;

/// Token of the socket in the link's poll.
const SOCKET: Token = Token(0);

/// Token of the owner's waker.
const WAKER: Token = Token(1);

/// Socket plus scratch space, owned by exactly one I/O thread.
pub(crate) struct SocketLink {
    /// The socket. `None` is the invalid-handle sentinel.
    stream: Option<TcpStream>,
    /// Readiness source for `stream` and the waker.
    poll: Poll,
    events: Events,
    /// Copy space between the socket and the ring buffers.
    scratch: Box<[u8]>,
    /// State shared with the owner thread.
    shared: Arc<ConnectionShared>,
    /// Longest readiness wait.
    poll_interval: Duration,
}

impl SocketLink {
    /// Creates a link with no socket attached and installs its waker in
    /// `shared`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the platform poller cannot be created.
    pub(crate) fn new(shared: Arc<ConnectionShared>, poll_interval: Duration) -> NetResult<Self> {
        let poll = Poll::new()?;
        shared.set_waker(Waker::new(poll.registry(), WAKER)?);
        Ok(Self {
            stream: None,
            poll,
            events: Events::with_capacity(4),
            scratch: vec![0u8; IO_CHUNK_SIZE].into_boxed_slice(),
            shared,
            poll_interval,
        })
    }

    /// Returns the state shared with the owner thread.
    #[inline]
    pub(crate) fn shared(&self) -> &ConnectionShared {
        &self.shared
    }

    /// Takes ownership of a non-blocking socket and enters `state`.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidState`] unless the link is `Disconnected` with no
    /// socket; the socket is dropped and the link left as it was. Fails with
    /// the platform error if the socket cannot be registered.
    pub(crate) fn attach(
        &mut self,
        mut stream: TcpStream,
        state: ConnectionState,
    ) -> NetResult<()> {
        if self.stream.is_some() || self.shared.state() != ConnectionState::Disconnected {
            return Err(NetError::InvalidState("already connected"));
        }
        self.poll
            .registry()
            .register(&mut stream, SOCKET, Interest::READABLE | Interest::WRITABLE)?;
        self.stream = Some(stream);
        self.shared.set_state(state);
        Ok(())
    }

    /// Checks whether a pending connect has completed.
    ///
    /// Returns the state after the check: `Establishing` while pending,
    /// `Connected` once the peer address is known.
    ///
    /// # Errors
    ///
    /// Fails with [`NetError::InvalidState`] outside `Establishing`, with
    /// [`NetError::ConnectTimeout`] once `timeout` has passed since
    /// `started`, and with the socket error if the connect failed. The socket
    /// is closed on every failure except the state check.
    pub(crate) fn poll_established(
        &mut self,
        started: Instant,
        timeout: Duration,
    ) -> NetResult<ConnectionState> {
        if self.shared.state() != ConnectionState::Establishing {
            return Err(NetError::InvalidState("not establishing"));
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(NetError::InvalidState("invalid socket"));
        };

        let outcome = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Err(NetError::Io(err)),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => Ok(ConnectionState::Connected),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                    if started.elapsed() >= timeout {
                        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                        Err(NetError::ConnectTimeout(millis))
                    } else {
                        Ok(ConnectionState::Establishing)
                    }
                }
                Err(err) => Err(NetError::Io(err)),
            },
        };

        match outcome {
            Ok(state) => {
                self.shared.set_state(state);
                Ok(state)
            }
            Err(err) => {
                self.close_quietly();
                Err(err)
            }
        }
    }

    /// Moves one chunk from the socket into the receive buffer.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidState`] unless connected; [`NetError::ConnectionClosed`]
    /// when the peer has closed; otherwise the socket error.
    pub(crate) fn recv_pass(&mut self) -> NetResult<IoStatus> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(NetError::InvalidState("not connected"));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::InvalidState("invalid socket"));
        };

        match stream.read(&mut self.scratch) {
            Ok(0) => {
                self.close_quietly();
                Err(NetError::ConnectionClosed)
            }
            Ok(count) => {
                self.shared.recv_buffer().write_bytes(&self.scratch[..count]);
                Ok(IoStatus::Transferred(count))
            }
            Err(err) if is_transient(&err) => Ok(IoStatus::Blocked),
            Err(err) => {
                self.close_quietly();
                Err(NetError::Io(err))
            }
        }
    }

    /// Moves one chunk from the send buffer onto the socket.
    ///
    /// Only the bytes the socket accepted leave the buffer, so a short write
    /// loses nothing.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidState`] unless connected; otherwise the socket error.
    pub(crate) fn send_pass(&mut self) -> NetResult<IoStatus> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(NetError::InvalidState("not connected"));
        }

        let pending = self.shared.send_buffer().peek_bytes(&mut self.scratch);
        if pending == 0 {
            return Ok(IoStatus::Idle);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::InvalidState("invalid socket"));
        };

        match stream.write(&self.scratch[..pending]) {
            Ok(0) => {
                self.close_quietly();
                Err(NetError::Io(io::ErrorKind::WriteZero.into()))
            }
            Ok(count) => {
                self.shared.send_buffer().discard(count);
                Ok(IoStatus::Transferred(count))
            }
            Err(err) if is_transient(&err) => Ok(IoStatus::Blocked),
            Err(err) => {
                self.close_quietly();
                Err(NetError::Io(err))
            }
        }
    }

    /// Runs one send pass and one receive pass.
    ///
    /// Returns the number of bytes moved in both directions.
    ///
    /// # Errors
    ///
    /// The first fatal error; the socket is already closed when it returns.
    pub(crate) fn pump(&mut self) -> NetResult<usize> {
        let sent = self.send_pass()?;
        let received = self.recv_pass()?;
        Ok(sent.bytes() + received.bytes())
    }

    /// Gives up the CPU between passes.
    ///
    /// After traffic the thread only yields, since a pass moves one chunk and
    /// more may be waiting. After an idle pass pair it blocks until the
    /// socket or the owner signals, or `poll_interval` passes.
    ///
    /// # Errors
    ///
    /// Returns the poller error; the socket is closed first.
    pub(crate) fn wait_ready(&mut self, moved: usize) -> NetResult<()> {
        if moved > 0 {
            thread::yield_now();
            return Ok(());
        }
        match self.poll.poll(&mut self.events, Some(self.poll_interval)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(err) => {
                self.close_quietly();
                Err(NetError::Io(err))
            }
        }
    }

    /// Closes the socket and enters `Disconnected`.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidState`] if there is no socket; the shutdown error
    /// if the platform reports one (the socket is released regardless).
    pub(crate) fn close(&mut self) -> NetResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Err(NetError::InvalidState("invalid socket"));
        };
        if let Err(err) = self.poll.registry().deregister(&mut stream) {
            tracing::trace!("deregister on close: {err}");
        }
        let result = match stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(NetError::Io(err)),
            _ => Ok(()),
        };
        drop(stream);
        self.shared.set_state(ConnectionState::Disconnected);
        result
    }

    /// Closes after a fatal error; a failing shutdown is only traced.
    fn close_quietly(&mut self) {
        if let Err(err) = self.close() {
            tracing::trace!("close after error: {err}");
        }
    }
}

/// Errors that mean "try again later".
fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Packet;
    use socket2::{Domain, Socket, Type};
    use std::net::TcpListener;

    fn connected_pair() -> (SocketLink, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        client.set_nonblocking(true).unwrap();
        let mut link = idle_link(Duration::from_millis(1));
        link.attach(TcpStream::from_std(client), ConnectionState::Connected).unwrap();
        (link, server)
    }

    fn idle_link(poll_interval: Duration) -> SocketLink {
        SocketLink::new(Arc::new(ConnectionShared::new()), poll_interval).unwrap()
    }

    /// A socket that was never connected, so its connect stays pending.
    fn unconnected_stream() -> TcpStream {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        socket.set_nonblocking(true).unwrap();
        TcpStream::from_std(socket.into())
    }

    #[test]
    fn test_passes_require_connected() {
        let mut link = idle_link(Duration::ZERO);
        assert!(matches!(link.recv_pass(), Err(NetError::InvalidState(_))));
        assert!(matches!(link.send_pass(), Err(NetError::InvalidState(_))));
        assert!(matches!(link.close(), Err(NetError::InvalidState(_))));
    }

    #[test]
    fn test_send_pass_idle_and_transfer() {
        let (mut link, mut peer) = connected_pair();
        assert_eq!(link.send_pass().unwrap(), IoStatus::Idle);

        let mut packet = Packet::new(1);
        packet.write_string("hello");
        link.shared().send_buffer().write_packet(&packet);
        let framed = link.shared().send_buffer().len();

        let mut sent = 0;
        while sent < framed {
            sent += link.send_pass().unwrap().bytes();
        }
        assert!(link.shared().send_buffer().is_empty());

        let mut wire = vec![0u8; framed];
        peer.read_exact(&mut wire).unwrap();
        let inbound = crate::protocol::PacketBuffer::new();
        inbound.write_bytes(&wire);
        let mut decoded = inbound.read_packet().unwrap();
        assert_eq!(decoded.read_string(), "hello");
    }

    #[test]
    fn test_recv_pass_blocked_then_transfer() {
        let (mut link, mut peer) = connected_pair();
        assert_eq!(link.recv_pass().unwrap(), IoStatus::Blocked);

        peer.write_all(&[1, 2, 3, 4]).unwrap();
        let mut received = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while received < 4 && Instant::now() < deadline {
            received += link.recv_pass().unwrap().bytes();
        }
        assert_eq!(link.shared().recv_buffer().len(), 4);
    }

    #[test]
    fn test_peer_close_is_fatal() {
        let (mut link, peer) = connected_pair();
        drop(peer);

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match link.recv_pass() {
                Ok(_) if Instant::now() < deadline => link.wait_ready(0).unwrap(),
                Ok(status) => panic!("peer close not observed: {status:?}"),
                Err(err) => break err,
            }
        };
        assert!(err.is_fatal());
        assert_eq!(link.shared().state(), ConnectionState::Disconnected);
        assert!(matches!(link.close(), Err(NetError::InvalidState(_))));
    }

    #[test]
    fn test_close_releases_once() {
        let (mut link, _peer) = connected_pair();
        link.close().unwrap();
        assert_eq!(link.shared().state(), ConnectionState::Disconnected);
        assert!(link.close().is_err());
    }

    #[test]
    fn test_attach_rejects_live_link() {
        let (mut link, _peer) = connected_pair();
        let err = link
            .attach(unconnected_stream(), ConnectionState::Establishing)
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidState("already connected")));
        assert_eq!(link.shared().state(), ConnectionState::Connected);

        // The first socket is still attached and closes exactly once.
        link.close().unwrap();
        assert!(link.close().is_err());
    }

    #[test]
    fn test_attach_rejects_non_disconnected_state() {
        let mut link = idle_link(Duration::ZERO);
        link.shared().set_state(ConnectionState::Listening);
        assert!(link.attach(unconnected_stream(), ConnectionState::Connected).is_err());
        assert_eq!(link.shared().state(), ConnectionState::Listening);
    }

    #[test]
    fn test_attach_after_close() {
        let (mut link, _peer) = connected_pair();
        link.close().unwrap();
        link.attach(unconnected_stream(), ConnectionState::Establishing).unwrap();
        assert_eq!(link.shared().state(), ConnectionState::Establishing);
    }

    #[test]
    fn test_poll_established_pending_then_timeout() {
        let mut link = idle_link(Duration::from_millis(1));
        link.attach(unconnected_stream(), ConnectionState::Establishing).unwrap();

        let state = link
            .poll_established(Instant::now(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(state, ConnectionState::Establishing);

        let err = link
            .poll_established(Instant::now(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, NetError::ConnectTimeout(0)));
        assert!(err.is_fatal());
        assert_eq!(link.shared().state(), ConnectionState::Disconnected);
        assert!(matches!(link.close(), Err(NetError::InvalidState(_))));
    }

    #[test]
    fn test_poll_established_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut link = idle_link(Duration::from_millis(1));
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        link.attach(stream, ConnectionState::Establishing).unwrap();

        let started = Instant::now();
        let state = loop {
            match link.poll_established(started, Duration::from_secs(5)).unwrap() {
                ConnectionState::Establishing => link.wait_ready(0).unwrap(),
                state => break state,
            }
        };
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(link.shared().state(), ConnectionState::Connected);
    }

    #[test]
    fn test_wait_ready_wakes_on_data() {
        let (mut link, mut peer) = connected_pair();
        link.poll_interval = Duration::from_secs(30);
        // Drain the initial writable readiness.
        link.wait_ready(0).unwrap();

        peer.write_all(&[7]).unwrap();
        let started = Instant::now();
        link.wait_ready(0).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let deadline = Instant::now() + Duration::from_secs(5);
        while link.shared().recv_buffer().is_empty() && Instant::now() < deadline {
            link.recv_pass().unwrap();
        }
        assert_eq!(link.shared().recv_buffer().len(), 1);
    }

    #[test]
    fn test_wait_ready_wakes_on_owner_signal() {
        let mut link = idle_link(Duration::from_secs(30));
        let shared = Arc::clone(&link.shared);
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            shared.request_disconnect();
        });

        let started = Instant::now();
        link.wait_ready(0).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(link.shared().disconnect_requested());
        signaller.join().unwrap();
    }
}
