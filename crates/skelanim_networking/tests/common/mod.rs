//! Helpers shared by the socket-level integration tests.

#![allow(dead_code)]

use skelanim_networking::NetworkContext;
use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

static CONTEXT: OnceLock<NetworkContext> = OnceLock::new();

/// The context every test in this binary shares.
pub fn context() -> &'static NetworkContext {
    CONTEXT.get_or_init(|| NetworkContext::startup().expect("networking already started"))
}

/// Polls `done` every couple of milliseconds for up to five seconds.
pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    wait_for(Duration::from_secs(5), &mut done)
}

/// Polls `done` until it holds or `limit` passes.
pub fn wait_for(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// A loopback port with nothing listening on it.
pub fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A loopback listener that never accepts and whose queue is already full,
/// so further connects stay pending. Keep it alive while they must stall.
pub struct StalledListener {
    _socket: Socket,
    _queued: Vec<TcpStream>,
    pub port: u16,
}

pub fn stalled_listener() -> StalledListener {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    socket
        .bind(&SocketAddr::from((Ipv4Addr::LOCALHOST, 0)).into())
        .unwrap();
    socket.listen(0).unwrap();
    let port = socket.local_addr().unwrap().as_socket().unwrap().port();

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut queued = Vec::new();
    while queued.len() < 8 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => queued.push(stream),
            Err(_) => break,
        }
    }
    StalledListener {
        _socket: socket,
        _queued: queued,
        port,
    }
}
