//! # Packet Ring Buffer
//!
//! Thread-safe FIFO of raw bytes with length-prefixed framing. This is the
//! hand-off point between an I/O thread (which only sees bytes) and the frame
//! thread (which only sees packets).
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────┐
//! │ type (i32)   │ size (i32)   │ payload (size bytes)    │
//! └──────────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! Native byte order, no padding. Frames sit back to back; only the last
//! one may be incomplete.
//!
//! ## Locking
//!
//! Every operation takes the instance's re-entrant lock, so a caller can
//! batch several operations with [`PacketBuffer::atomically`] and still call
//! the ordinary methods inside the batch.

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

use super::packet::Packet;

/// Size of a frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Frame header as laid out in the buffer and on the wire.
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct FrameHeader {
    /// Packet type tag.
    packet_type: i32,
    /// Payload length in bytes.
    size: i32,
}

/// Growable, lock-protected byte queue holding framed packets.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    data: ReentrantMutex<RefCell<Vec<u8>>>,
}

impl PacketBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().borrow().len()
    }

    /// Returns true if no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every buffered byte.
    pub fn clear(&self) {
        self.data.lock().borrow_mut().clear();
    }

    /// Runs `batch` while holding the lock, so no other thread observes the
    /// buffer between the operations it performs.
    pub fn atomically<R>(&self, batch: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.data.lock();
        batch(self)
    }

    /// Appends raw bytes. Returns the number of bytes appended.
    pub fn write_bytes(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        self.data.lock().borrow_mut().extend_from_slice(bytes);
        bytes.len()
    }

    /// Removes up to `out.len()` bytes from the head into `out`.
    ///
    /// Returns the number of bytes removed, never more than are buffered.
    pub fn read_bytes(&self, out: &mut [u8]) -> usize {
        let guard = self.data.lock();
        let mut data = guard.borrow_mut();
        let count = out.len().min(data.len());
        out[..count].copy_from_slice(&data[..count]);
        data.drain(..count);
        count
    }

    /// Copies up to `out.len()` bytes from the head without removing them.
    pub fn peek_bytes(&self, out: &mut [u8]) -> usize {
        let guard = self.data.lock();
        let data = guard.borrow();
        let count = out.len().min(data.len());
        out[..count].copy_from_slice(&data[..count]);
        count
    }

    /// Removes up to `count` bytes from the head. Returns how many were removed.
    pub fn discard(&self, count: usize) -> usize {
        let guard = self.data.lock();
        let mut data = guard.borrow_mut();
        let count = count.min(data.len());
        data.drain(..count);
        count
    }

    /// Appends one frame carrying the packet's type and written payload.
    pub fn write_packet(&self, packet: &Packet) {
        let payload = packet.payload();
        let size = i32::try_from(payload.len()).unwrap_or(i32::MAX);
        let header = FrameHeader {
            packet_type: packet.packet_type(),
            size,
        };

        let guard = self.data.lock();
        let mut data = guard.borrow_mut();
        data.extend_from_slice(bytes_of(&header));
        data.extend_from_slice(&payload[..size as usize]);
    }

    /// Removes and decodes the frame at the head.
    ///
    /// Returns `None` and leaves the buffer untouched unless a complete
    /// frame (header and whole payload) is buffered.
    #[must_use]
    pub fn read_packet(&self) -> Option<Packet> {
        let guard = self.data.lock();
        let mut data = guard.borrow_mut();

        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let header: FrameHeader = pod_read_unaligned(&data[..FRAME_HEADER_SIZE]);

        // A negative size never completes; the frame stays put.
        let size = usize::try_from(header.size).ok()?;
        let frame_len = FRAME_HEADER_SIZE + size;
        if data.len() < frame_len {
            return None;
        }

        let payload = data[FRAME_HEADER_SIZE..frame_len].to_vec();
        data.drain(..frame_len);
        Some(Packet::from_parts(header.packet_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn chat_packet(name: &str, text: &str) -> Packet {
        let mut packet = Packet::new(1);
        packet.write_string(name);
        packet.write_string(text);
        packet
    }

    #[test]
    fn test_header_size() {
        assert_eq!(FRAME_HEADER_SIZE, 8);
    }

    #[test]
    fn test_packets_come_back_in_order() {
        let buffer = PacketBuffer::new();
        let mut sent = Vec::new();

        for i in 0..16 {
            let mut packet = Packet::new(i % 4);
            packet.write(i);
            packet.write_string(&format!("payload-{i}"));
            buffer.write_packet(&packet);
            sent.push(packet);
        }

        for expected in &sent {
            let received = buffer.read_packet().expect("frame available");
            assert_eq!(received.packet_type(), expected.packet_type());
            assert_eq!(received.payload(), expected.payload());
            assert_eq!(received.read_index(), 0);
        }
        assert!(buffer.read_packet().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_payload_frame() {
        let buffer = PacketBuffer::new();
        buffer.write_packet(&Packet::new(9));
        assert_eq!(buffer.len(), FRAME_HEADER_SIZE);

        let packet = buffer.read_packet().unwrap();
        assert_eq!(packet.packet_type(), 9);
        assert!(packet.is_empty());
    }

    #[test]
    fn test_partial_payload_is_not_consumed() {
        let buffer = PacketBuffer::new();
        let header = FrameHeader { packet_type: 1, size: 8 };
        buffer.write_bytes(bytes_of(&header));
        buffer.write_bytes(&[1, 2, 3]);

        assert!(buffer.read_packet().is_none());
        assert_eq!(buffer.len(), 11);

        buffer.write_bytes(&[4, 5]);
        assert!(buffer.read_packet().is_none());
        assert_eq!(buffer.len(), 13);

        buffer.write_bytes(&[6, 7, 8]);
        let packet = buffer.read_packet().unwrap();
        assert_eq!(packet.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_header_is_not_consumed() {
        let buffer = PacketBuffer::new();
        buffer.write_bytes(&[1, 0, 0]);
        assert!(buffer.read_packet().is_none());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_negative_size_never_completes() {
        let buffer = PacketBuffer::new();
        let header = FrameHeader { packet_type: 1, size: -4 };
        buffer.write_bytes(bytes_of(&header));
        buffer.write_bytes(&[0; 32]);

        assert!(buffer.read_packet().is_none());
        assert_eq!(buffer.len(), FRAME_HEADER_SIZE + 32);
    }

    #[test]
    fn test_read_bytes_clamps() {
        let buffer = PacketBuffer::new();
        assert_eq!(buffer.read_bytes(&mut [0u8; 4]), 0);

        buffer.write_bytes(&[10, 20, 30]);
        let mut out = [0u8; 8];
        assert_eq!(buffer.read_bytes(&mut out), 3);
        assert_eq!(&out[..3], &[10, 20, 30]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_bytes_removes_only_what_it_returns() {
        let buffer = PacketBuffer::new();
        buffer.write_bytes(&[1, 2, 3, 4, 5]);

        let mut out = [0u8; 2];
        assert_eq!(buffer.read_bytes(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(buffer.len(), 3);

        let mut rest = [0u8; 3];
        assert_eq!(buffer.read_bytes(&mut rest), 3);
        assert_eq!(rest, [3, 4, 5]);
    }

    #[test]
    fn test_peek_then_discard() {
        let buffer = PacketBuffer::new();
        buffer.write_bytes(&[1, 2, 3, 4]);

        let mut out = [0u8; 3];
        assert_eq!(buffer.peek_bytes(&mut out), 3);
        assert_eq!(buffer.len(), 4);

        assert_eq!(buffer.discard(2), 2);
        assert_eq!(buffer.discard(10), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_atomically_is_reentrant() {
        let buffer = PacketBuffer::new();
        let frames = buffer.atomically(|inner| {
            inner.write_packet(&chat_packet("a", "b"));
            inner.write_packet(&chat_packet("c", "d"));
            inner.atomically(|nested| nested.len())
        });
        assert!(frames > 2 * FRAME_HEADER_SIZE);

        let mut first = buffer.read_packet().unwrap();
        assert_eq!(first.read_string(), "a");
        assert_eq!(first.read_string(), "b");
    }

    #[test]
    fn test_clear() {
        let buffer = PacketBuffer::new();
        buffer.write_packet(&chat_packet("x", "y"));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.read_packet().is_none());
    }

    #[test]
    fn test_cross_thread_fifo() {
        let buffer = Arc::new(PacketBuffer::new());
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..1000i32 {
                    let mut packet = Packet::new(2);
                    packet.write(i);
                    buffer.write_packet(&packet);
                }
            })
        };

        let mut next = 0i32;
        while next < 1000 {
            if let Some(mut packet) = buffer.read_packet() {
                assert_eq!(packet.read::<i32>().unwrap(), next);
                next += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert!(buffer.is_empty());
    }
}
