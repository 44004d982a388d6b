//! # SKELANIM Networking
//!
//! Peer-to-peer TCP networking for the skeletal animation demo.
//!
//! ## Architecture
//!
//! ```text
//!  APPLICATION THREAD                    I/O THREADS
//!  ──────────────────                    ───────────
//!  send_to_server / send_to / broadcast
//!        │
//!        ▼
//!  outbound queue ──tick()──▶ send PacketBuffer ──send_pass──▶ socket
//!                                                                │
//!  handlers ◀──tick()── recv PacketBuffer ◀──recv_pass───────────┘
//! ```
//!
//! - **Protocol**: [`Packet`] cursor serialization and [`PacketBuffer`]
//!   length-prefixed framing.
//! - **Client**: one outbound connection with retry and backoff.
//! - **Server**: an accept thread plus one thread per connection.
//! - **Dispatch**: handlers run only on the thread that calls `tick()`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use skelanim_networking::{NetworkContext, NetworkServer, Packet};
//!
//! let context = NetworkContext::startup()?;
//! let mut server = NetworkServer::new(&context);
//! server.register_handler(1, |outbox, _index, packet| {
//!     outbox.broadcast(&packet.clone());
//! });
//! server.create_server(25564)?;
//!
//! loop {
//!     server.tick(); // Once per frame
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use client::{NetworkClient, Outbox};
pub use config::NetworkConfig;
pub use connection::{AtomicConnectionState, ConnectionState};
pub use context::NetworkContext;
pub use error::{IoStatus, NetError, NetResult};
pub use protocol::{Packet, PacketBuffer, FRAME_HEADER_SIZE};
pub use server::{ConnectionIndex, NetworkServer, ServerOutbox};

/// Host a client connects to when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used by both sides when none is configured.
pub const DEFAULT_PORT: u16 = 25564;

/// Pause between client reconnect attempts.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1500;

/// Reconnect attempts after the first.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Longest a non-blocking connect may stay pending.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Sleep between I/O passes that moved nothing.
pub const POLL_INTERVAL_MS: u64 = 2;

/// Largest single socket read or write.
pub const IO_CHUNK_SIZE: usize = 8192;

/// Index given to the first connection a server accepts.
pub const FIRST_CONNECTION_INDEX: i32 = 12;
