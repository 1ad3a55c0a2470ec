//! Order-preserving variable-length unsigned integers.
//!
//! The number of leading one bits in the first byte gives the number of
//! extra bytes that follow, so the encoded bytes of two values compare the
//! same way the values do. This keeps keys built from these integers sorted
//! by numeric order inside an ordered key-value store.
//!
//! | value range        | bytes | first byte  |
//! |--------------------|-------|-------------|
//! | `< 2^7`            | 1     | `0xxxxxxx`  |
//! | `< 2^14`           | 2     | `10xxxxxx`  |
//! | `< 2^21`           | 3     | `110xxxxx`  |
//! | `< 2^28`           | 4     | `1110xxxx`  |
//! | `< 2^35`           | 5     | `11110xxx`  |
//! | `< 2^42`           | 6     | `111110xx`  |
//! | `< 2^49`           | 7     | `1111110x`  |
//! | `< 2^56`           | 8     | `11111110`  |
//! | otherwise          | 9     | `11111111`  |
//!
//! Signed values are zigzag-mapped first, which keeps small magnitudes short
//! (but does not preserve signed order).

use crate::error::{CodecError, CodecResult};

/// Maximum encoded length of a single integer.
pub const MAX_VUINT_LEN: usize = 9;

/// Returns the encoded length of `value`.
#[must_use]
pub const fn vuint_len(value: u64) -> usize {
    if value < 1 << 7 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 21 {
        3
    } else if value < 1 << 28 {
        4
    } else if value < 1 << 35 {
        5
    } else if value < 1 << 42 {
        6
    } else if value < 1 << 49 {
        7
    } else if value < 1 << 56 {
        8
    } else {
        9
    }
}

/// Returns the total encoded length announced by a first byte.
#[must_use]
pub const fn vuint_len_from_first(first: u8) -> usize {
    first.leading_ones() as usize + 1
}

/// Appends the encoding of `value` to `out`.
pub fn write_vuint(out: &mut Vec<u8>, value: u64) {
    let len = vuint_len(value);
    let bytes = value.to_be_bytes();
    match len {
        9 => {
            out.push(0xFF);
            out.extend_from_slice(&bytes);
        }
        8 => {
            out.push(0xFE);
            out.extend_from_slice(&bytes[1..]);
        }
        _ => {
            let tail = &bytes[8 - len..];
            let marker = !(0xFFu8 >> (len - 1));
            out.push(marker | tail[0]);
            out.extend_from_slice(&tail[1..]);
        }
    }
}

/// Decodes one integer from the start of `data`, returning it with the
/// number of bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] if `data` is shorter than the
/// length announced by its first byte.
pub fn read_vuint(data: &[u8]) -> CodecResult<(u64, usize)> {
    let first = *data.first().ok_or(CodecError::UnexpectedEof)?;
    let len = vuint_len_from_first(first);
    if data.len() < len {
        return Err(CodecError::UnexpectedEof);
    }
    let mut value = match len {
        8 | 9 => 0,
        _ => u64::from(first & (0xFFu8 >> len)),
    };
    for byte in &data[1..len] {
        value = (value << 8) | u64::from(*byte);
    }
    Ok((value, len))
}

/// Maps a signed integer onto the unsigned range, small magnitudes first.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
