//! # SKELANIM
//!
//! Game-side glue over [`skelanim_networking`]: the packet type table, the
//! chat relay, the developer console, and the frame clock that drives
//! `tick()`.
//!
//! ## Frame Loop
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ FrameClock  │──▶│ console line │──▶│ Game::execute        │
//! │ (60 Hz)     │   │ (channel)    │   └──────────────────────┘
//! │             │   └──────────────┘   ┌──────────────────────┐
//! │             │─────────────────────▶│ Game::update         │
//! └─────────────┘                      │  client.tick()       │
//!                                      │  server.tick()       │
//!                                      └──────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod console;
pub mod error;
pub mod frame_clock;
pub mod game;
pub mod protocol;

pub use config::AppConfig;
pub use console::{ChatLog, ConsoleCommand, LogLine, Severity};
pub use error::{AppError, AppResult};
pub use frame_clock::{FrameClock, FrameStats};
pub use game::Game;
pub use protocol::PacketType;
