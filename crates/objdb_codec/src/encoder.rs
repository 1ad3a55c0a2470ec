//! Byte writer for stored rows and keys.

use uuid::Uuid;

use crate::ordered::{f64_to_ordered, i64_to_ordered, ESCAPED_ZERO, TERMINATOR};
use crate::vuint::{write_vuint, zigzag_encode};

/// Append-only writer producing the binary layout used for keys and rows.
///
/// All integers use the order-preserving variable-length form from
/// [`crate::vuint`], so a key built with this writer sorts the same way as
/// the tuple of values written into it.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Create a writer that appends after an existing prefix.
    pub fn with_prefix(prefix: &[u8]) -> Self {
        Self {
            buffer: prefix.to_vec(),
        }
    }

    /// Consume this writer and return the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Write an unsigned integer.
    pub fn write_vuint(&mut self, value: u64) {
        write_vuint(&mut self.buffer, value);
    }

    /// Write a signed integer (zigzag mapped).
    pub fn write_vint(&mut self, value: i64) {
        write_vuint(&mut self.buffer, zigzag_encode(value));
    }

    /// Write a signed integer as 8 big-endian bytes that sort numerically.
    pub fn write_i64_ordered(&mut self, value: i64) {
        self.buffer
            .extend_from_slice(&i64_to_ordered(value).to_be_bytes());
    }

    /// Write a float as 8 big-endian bytes that sort numerically.
    pub fn write_f64_ordered(&mut self, value: f64) {
        self.buffer
            .extend_from_slice(&f64_to_ordered(value).to_be_bytes());
    }

    /// Write a float as 8 little-endian bytes.
    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a length-prefixed byte string.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_vuint(value.len() as u64);
        self.buffer.extend_from_slice(value);
    }

    /// Write a byte string that sorts lexicographically among keys.
    ///
    /// Zero bytes are escaped as `00 01` and the string ends with `00 00`,
    /// so a string sorts before every string it prefixes.
    pub fn write_bytes_ordered(&mut self, value: &[u8]) {
        for chunk in value.split_inclusive(|b| *b == 0) {
            self.buffer.extend_from_slice(chunk);
            if chunk.last() == Some(&0) {
                self.buffer.push(ESCAPED_ZERO);
            }
        }
        self.buffer.extend_from_slice(&[0, TERMINATOR]);
    }

    /// Write a UTF-8 string that sorts lexicographically among keys.
    pub fn write_str_ordered(&mut self, value: &str) {
        self.write_bytes_ordered(value.as_bytes());
    }

    /// Write a 16-byte identifier.
    pub fn write_guid(&mut self, value: &Uuid) {
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buffer.extend_from_slice(value);
    }
}
