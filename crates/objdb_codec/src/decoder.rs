//! Byte reader matching [`crate::ByteWriter`].

use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::ordered::{f64_from_ordered, i64_from_ordered, ESCAPED_ZERO, TERMINATOR};
use crate::vuint::{read_vuint, zigzag_decode};

/// Maximum allowed byte/string length.
/// This prevents allocation-based DoS from corrupted rows.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Cursor over an encoded row or key.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Current offset from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Read `len` raw bytes.
    #[inline]
    pub fn read_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a boolean byte.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::decoding_failed(format!(
                "invalid boolean byte {other}"
            ))),
        }
    }

    /// Read an unsigned integer.
    pub fn read_vuint(&mut self) -> CodecResult<u64> {
        let (value, len) = read_vuint(self.remaining())?;
        self.pos += len;
        Ok(value)
    }

    /// Read an unsigned integer that must fit in 32 bits.
    pub fn read_vuint32(&mut self) -> CodecResult<u32> {
        u32::try_from(self.read_vuint()?).map_err(|_| CodecError::IntegerOverflow)
    }

    /// Read a signed integer.
    pub fn read_vint(&mut self) -> CodecResult<i64> {
        self.read_vuint().map(zigzag_decode)
    }

    fn read_u64_be(&mut self) -> CodecResult<u64> {
        let bytes = self.read_raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a signed integer written by `write_i64_ordered`.
    pub fn read_i64_ordered(&mut self) -> CodecResult<i64> {
        self.read_u64_be().map(i64_from_ordered)
    }

    /// Read a float written by `write_f64_ordered`.
    pub fn read_f64_ordered(&mut self) -> CodecResult<f64> {
        self.read_u64_be().map(f64_from_ordered)
    }

    /// Read an 8-byte little-endian float.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        let bytes = self.read_raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_vuint()?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::LengthLimit {
                length: len,
                limit: MAX_BYTES_LENGTH,
            });
        }
        let len = usize::try_from(len).map_err(|_| CodecError::IntegerOverflow)?;
        self.read_raw(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> CodecResult<&'a str> {
        std::str::from_utf8(self.read_bytes()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a byte string written by `write_bytes_ordered`.
    pub fn read_bytes_ordered(&mut self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.read_u8()? {
                0 => match self.read_u8()? {
                    TERMINATOR => return Ok(out),
                    ESCAPED_ZERO => out.push(0),
                    other => {
                        return Err(CodecError::decoding_failed(format!(
                            "invalid escape byte {other:#04x} in ordered string"
                        )))
                    }
                },
                byte => out.push(byte),
            }
        }
    }

    /// Read a UTF-8 string written by `write_str_ordered`.
    pub fn read_str_ordered(&mut self) -> CodecResult<String> {
        String::from_utf8(self.read_bytes_ordered()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a 16-byte identifier.
    pub fn read_guid(&mut self) -> CodecResult<Uuid> {
        let bytes = self.read_raw(16)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(buf))
    }

    /// Skip an unsigned (or zigzag signed) integer.
    pub fn skip_vuint(&mut self) -> CodecResult<()> {
        self.read_vuint().map(|_| ())
    }

    /// Skip a length-prefixed byte string.
    pub fn skip_bytes(&mut self) -> CodecResult<()> {
        self.read_bytes().map(|_| ())
    }

    /// Skip `len` raw bytes.
    pub fn skip_raw(&mut self, len: usize) -> CodecResult<()> {
        self.read_raw(len).map(|_| ())
    }
}
