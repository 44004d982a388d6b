//! # Networking Error Types
//!
//! All errors that can occur in the networking layer.
//!
//! Every error maps to a numeric code through [`NetError::code`] so callers
//! that surface results on a console can print `message(code)` pairs.
//! "Would block" is never an error: transfer operations report it as
//! [`IoStatus::Blocked`] with code 0.

use std::io;
use thiserror::Error;

/// Code used for configuration errors (already running, not running).
pub const CODE_CONFIGURATION: i32 = -1;

/// Code used when an operation is invalid in the current state.
pub const CODE_INVALID_STATE: i32 = 1;

/// Errors that can occur in the networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// The component is already running.
    #[error("{0} already running")]
    AlreadyRunning(&'static str),

    /// The component is not running.
    #[error("{0} not running")]
    NotRunning(&'static str),

    /// The operation is not valid in the current connection state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Host/port did not resolve to any address.
    #[error("unable to resolve {host}:{port}")]
    AddressResolution {
        /// Host that was looked up.
        host: String,
        /// Port that was looked up.
        port: u16,
    },

    /// A pending connect did not complete in time.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The remote end closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A read went past the written region of a packet.
    #[error("data index out of bounds: need {needed} bytes at {offset}, {available} written")]
    OutOfBounds {
        /// Read cursor at the time of the read.
        offset: usize,
        /// Bytes the read required.
        needed: usize,
        /// Bytes written to the packet.
        available: usize,
    },

    /// A string length prefix decoded to a negative value.
    #[error("negative string length {length} at {offset}")]
    NegativeLength {
        /// Offset of the length prefix.
        offset: usize,
        /// Decoded length.
        length: i32,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket error reported by the platform.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Returns the numeric code of this error.
    ///
    /// I/O errors carry the platform error number when one is available.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidState(_) => CODE_INVALID_STATE,
            Self::Io(err) => err.raw_os_error().unwrap_or(CODE_CONFIGURATION),
            _ => CODE_CONFIGURATION,
        }
    }

    /// Returns true for errors that tear a connection down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::ConnectTimeout(_) | Self::AddressResolution { .. }
        )
    }
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;

/// Outcome of one non-blocking transfer pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    /// Bytes were moved between the socket and a ring buffer.
    Transferred(usize),
    /// The socket was not ready; nothing happened.
    Blocked,
    /// There was nothing to send.
    Idle,
}

impl IoStatus {
    /// Transfer outcomes are successes, so the code is always 0.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        0
    }

    /// Returns a short description of the outcome.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Transferred(_) => "success",
            Self::Blocked => "blocking",
            Self::Idle => "empty",
        }
    }

    /// Returns the number of bytes moved.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Transferred(n) => n,
            Self::Blocked | Self::Idle => 0,
        }
    }
}
