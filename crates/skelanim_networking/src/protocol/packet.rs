//! # Packet
//!
//! A typed message with explicit read and write cursors.
//!
//! ## Layout
//!
//! Values are appended as raw native-order bytes (`bytemuck::bytes_of`), so
//! a packet is only meaningful to a peer with the same architecture. There is
//! no schema: the reader must issue reads in exactly the order and with
//! exactly the types the writer used.
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────────┬─────┐
//! │ i32      │ f32      │ i32 len │ bytes │ 0  │ ... │
//! └──────────┴──────────┴──────────────────────┴─────┘
//!  ^ read_index                               ^ write_index
//! ```

use bytemuck::{bytes_of, cast_slice, pod_read_unaligned, Pod};
use std::mem::size_of;

use crate::error::{NetError, NetResult};

/// A typed, growable message buffer.
///
/// Invariant: `read_index <= write_index == data.len()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Application-defined type tag.
    packet_type: i32,
    /// Written bytes.
    data: Vec<u8>,
    /// Read cursor.
    read_index: usize,
}

impl Packet {
    /// Creates an empty packet with the given type tag.
    #[must_use]
    pub fn new(packet_type: impl Into<i32>) -> Self {
        Self {
            packet_type: packet_type.into(),
            data: Vec::new(),
            read_index: 0,
        }
    }

    /// Rebuilds a packet from a decoded frame. The read cursor starts at 0.
    #[must_use]
    pub(crate) fn from_parts(packet_type: i32, data: Vec<u8>) -> Self {
        Self {
            packet_type,
            data,
            read_index: 0,
        }
    }

    /// Returns the type tag.
    #[inline]
    #[must_use]
    pub const fn packet_type(&self) -> i32 {
        self.packet_type
    }

    /// Replaces the type tag.
    #[inline]
    pub fn set_packet_type(&mut self, packet_type: impl Into<i32>) {
        self.packet_type = packet_type.into();
    }

    /// Returns the number of written bytes (the write cursor).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the read cursor.
    #[inline]
    #[must_use]
    pub const fn read_index(&self) -> usize {
        self.read_index
    }

    /// Returns the number of written bytes not yet read.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_index
    }

    /// Returns the written payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Moves the read cursor back to the start so the packet can be re-read.
    #[inline]
    pub fn rewind(&mut self) {
        self.read_index = 0;
    }

    /// Appends the raw bytes of a plain-old-data value.
    pub fn write<T: Pod>(&mut self, value: T) {
        self.data.extend_from_slice(bytes_of(&value));
    }

    /// Appends the raw bytes of a slice of plain-old-data values.
    pub fn write_slice<T: Pod>(&mut self, values: &[T]) {
        self.data.extend_from_slice(cast_slice(values));
    }

    /// Reads the next value and advances the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::OutOfBounds`] if fewer than `size_of::<T>()`
    /// written bytes remain. The cursor is left untouched.
    pub fn read<T: Pod>(&mut self) -> NetResult<T> {
        let bytes = self.take(size_of::<T>())?;
        Ok(pod_read_unaligned(bytes))
    }

    /// Reads `count` consecutive values and advances the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::OutOfBounds`] if the values were not all written.
    /// The cursor is left untouched.
    pub fn read_slice<T: Pod>(&mut self, count: usize) -> NetResult<Vec<T>> {
        let size = size_of::<T>();
        if size == 0 {
            return Ok(vec![T::zeroed(); count]);
        }
        let needed = size.saturating_mul(count);
        let bytes = self.take(needed)?;
        Ok(bytes.chunks_exact(size).map(pod_read_unaligned).collect())
    }

    /// Writes a length-prefixed, zero-terminated string.
    ///
    /// Wire form: `i32 length`, then `length` bytes, then a `0` byte.
    pub fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let length = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
        self.write(length);
        self.data.extend_from_slice(&bytes[..length as usize]);
        self.data.push(0);
    }

    /// Reads a string written by [`Packet::write_string`].
    ///
    /// Malformed input is reported and yields an empty string; the cursor is
    /// restored to where it was before the call.
    pub fn read_string(&mut self) -> String {
        self.try_read_string().unwrap_or_default()
    }

    /// Reads a string written by [`Packet::write_string`].
    ///
    /// Bytes after the first zero are ignored and invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::OutOfBounds`] if the length prefix is missing or
    /// larger than the remaining payload, [`NetError::NegativeLength`] if it
    /// is negative. The cursor is left untouched.
    pub fn try_read_string(&mut self) -> NetResult<String> {
        let start = self.read_index;
        let length: i32 = self.read()?;

        let Ok(length) = usize::try_from(length) else {
            self.read_index = start;
            let err = NetError::NegativeLength { offset: start, length };
            tracing::error!(packet_type = self.packet_type, "{err}");
            return Err(err);
        };

        let needed = length.saturating_add(1);
        let bytes = match self.take(needed) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.read_index = start;
                return Err(err);
            }
        };

        let text = bytes[..length].split(|b| *b == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    /// Consumes `needed` bytes from the read cursor.
    fn take(&mut self, needed: usize) -> NetResult<&[u8]> {
        let start = self.read_index;
        let end = start.saturating_add(needed);
        if end > self.data.len() {
            return Err(self.out_of_bounds(start, needed));
        }
        self.read_index = end;
        Ok(&self.data[start..end])
    }

    /// Builds (and reports) an out-of-bounds error.
    fn out_of_bounds(&self, offset: usize, needed: usize) -> NetError {
        let err = NetError::OutOfBounds {
            offset,
            needed,
            available: self.data.len(),
        };
        tracing::error!(packet_type = self.packet_type, "{err}");
        err
    }
}
