//! Error types for the game glue.

use skelanim_networking::NetError;
use thiserror::Error;

/// Errors raised by console parsing, configuration, and game setup.
#[derive(Debug, Error)]
pub enum AppError {
    /// Networking layer error.
    #[error(transparent)]
    Net(#[from] NetError),

    /// Packet tag outside the game table.
    #[error("unknown packet type {0}")]
    UnknownPacketType(i32),

    /// Console line naming no known command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Console argument that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidArgument {
        /// Argument name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Console line with an unterminated quote.
    #[error("unterminated quote in: {0}")]
    UnterminatedQuote(String),

    /// Configuration file problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// File or terminal I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for the game glue.
pub type AppResult<T> = Result<T, AppError>;
