//! # Connection State Machine
//!
//! State shared by client and server connections.
//!
//! ## Transitions
//!
//! ```text
//!                  connect()            writable
//! ┌──────────────┐ ─────────▶ ┌──────────────┐ ───────▶ ┌───────────┐
//! │ DISCONNECTED │            │ ESTABLISHING │          │ CONNECTED │
//! └──────────────┘ ◀───────── └──────────────┘          └───────────┘
//!        ▲   ▲        close()                                 │
//!        │   └────────────────────── close() ─────────────────┘
//!        │
//!        │  shutdown / accept error     ┌───────────┐
//!        └───────────────────────────── │ LISTENING │ (server only)
//!                                       └───────────┘
//! ```
//!
//! Accepted server connections start in `CONNECTED`.
//!
//! ## Cross-Thread Flags
//!
//! The owner thread and the I/O thread talk only through atomics (state,
//! disconnect request, running) and the two ring buffers. Stores use
//! `Release`, loads use `Acquire`. The owner wakes an I/O thread blocked on
//! readiness through its `mio::Waker` after queueing bytes or asking it to
//! close.

mod link;

pub(crate) use link::SocketLink;

use mio::Waker;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::NetError;
use crate::protocol::PacketBuffer;

/// State of a connection or listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket. Initial and terminal state.
    #[default]
    Disconnected = 0,
    /// Non-blocking connect issued, not yet writable (client only).
    Establishing = 1,
    /// Data can flow.
    Connected = 2,
    /// Bound and accepting (server manager only).
    Listening = 3,
}

impl ConnectionState {
    /// Every state, in discriminant order.
    pub const ALL: [Self; 4] = [
        Self::Disconnected,
        Self::Establishing,
        Self::Connected,
        Self::Listening,
    ];

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Establishing => "ESTABLISHING",
            Self::Connected => "CONNECTED",
            Self::Listening => "LISTENING",
        }
    }

    /// Looks a state up by name, ignoring case. Unknown names give `default`.
    #[must_use]
    pub fn from_name(name: &str, default: Self) -> Self {
        Self::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(name))
            .unwrap_or(default)
    }

    /// Decodes a stored discriminant. Out-of-range values read as disconnected.
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Establishing,
            2 => Self::Connected,
            3 => Self::Listening,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConnectionState {
    type Err = NetError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(name))
            .ok_or(NetError::InvalidState("unknown connection state name"))
    }
}

/// A [`ConnectionState`] readable and writable from any thread.
#[derive(Debug, Default)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Creates a new cell holding `state`.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Reads the current state.
    #[inline]
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Publishes a new state.
    #[inline]
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Everything the owner thread and one I/O thread share about a connection.
#[derive(Debug, Default)]
pub(crate) struct ConnectionShared {
    state: AtomicConnectionState,
    disconnect: AtomicBool,
    running: AtomicBool,
    send: PacketBuffer,
    recv: PacketBuffer,
    /// Installed by the I/O thread's link.
    waker: Mutex<Option<Waker>>,
}

impl ConnectionShared {
    /// Creates shared state for a connection that has not started.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        self.state.load()
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state);
    }

    /// Asks the I/O thread to close and exit.
    #[inline]
    pub(crate) fn request_disconnect(&self) {
        self.disconnect.store(true, Ordering::Release);
        self.wake();
    }

    #[inline]
    pub(crate) fn disconnect_requested(&self) -> bool {
        self.disconnect.load(Ordering::Acquire)
    }

    /// Clears a request once the I/O thread has acted on it.
    #[inline]
    pub(crate) fn clear_disconnect(&self) {
        self.disconnect.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Installs the waker of the link servicing this connection.
    pub(crate) fn set_waker(&self, waker: Waker) {
        *self.waker.lock() = Some(waker);
    }

    /// Cuts a readiness wait in the I/O thread short.
    pub(crate) fn wake(&self) {
        if let Some(waker) = self.waker.lock().as_ref() {
            if let Err(err) = waker.wake() {
                tracing::trace!("wake failed: {err}");
            }
        }
    }

    /// Bytes waiting to go out on the socket.
    #[inline]
    pub(crate) fn send_buffer(&self) -> &PacketBuffer {
        &self.send
    }

    /// Bytes that came in from the socket.
    #[inline]
    pub(crate) fn recv_buffer(&self) -> &PacketBuffer {
        &self.recv
    }

    /// Empties both buffers as one step.
    pub(crate) fn clear_buffers(&self) {
        self.send.atomically(|send| {
            self.recv.atomically(|recv| {
                send.clear();
                recv.clear();
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_one_to_one() {
        for state in ConnectionState::ALL {
            assert_eq!(ConnectionState::from_name(state.name(), ConnectionState::Listening), state);
            assert_eq!(state.name().parse::<ConnectionState>().unwrap(), state);
        }
        assert_eq!(
            ConnectionState::from_name("ESTABLISHING", ConnectionState::Disconnected),
            ConnectionState::Establishing
        );
    }

    #[test]
    fn test_name_lookup_ignores_case() {
        assert_eq!(
            ConnectionState::from_name("connected", ConnectionState::Disconnected),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::from_name("bogus", ConnectionState::Listening),
            ConnectionState::Listening
        );
        assert!("bogus".parse::<ConnectionState>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Listening.to_string(), "LISTENING");
    }

    #[test]
    fn test_atomic_state() {
        let cell = AtomicConnectionState::default();
        assert_eq!(cell.load(), ConnectionState::Disconnected);
        for state in ConnectionState::ALL {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn test_shared_flags() {
        let shared = ConnectionShared::new();
        assert!(!shared.is_running());
        assert!(!shared.disconnect_requested());

        shared.request_disconnect();
        assert!(shared.disconnect_requested());
        shared.clear_disconnect();
        assert!(!shared.disconnect_requested());

        shared.send_buffer().write_bytes(&[1, 2, 3]);
        shared.recv_buffer().write_bytes(&[4]);
        shared.clear_buffers();
        assert!(shared.send_buffer().is_empty());
        assert!(shared.recv_buffer().is_empty());
    }
}
