//! # Wire Protocol
//!
//! Packets and the framing buffer that carries them between threads and
//! across the socket.
//!
//! ## Stream Structure
//!
//! ```text
//! ┌───────────────────────────┬───────────────────────────┬────
//! │ Frame 0                   │ Frame 1                   │ ...
//! │ type │ size │ payload     │ type │ size │ payload     │
//! └───────────────────────────┴───────────────────────────┴────
//! ```
//!
//! Both directions of a TCP connection carry the same stream. Integers are
//! native-endian: peers must share an architecture.

mod packet;
mod packet_buffer;

pub use packet::Packet;
pub use packet_buffer::{PacketBuffer, FRAME_HEADER_SIZE};
