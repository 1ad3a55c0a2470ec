//! Fixed-width order-preserving encodings for signed and float key fields.
//!
//! Zigzag keeps signed values short but sorts `-1` after `0`. Key fields use
//! these big-endian forms instead so that keys sort in numeric order.
//! Strings and byte strings in keys are zero-escaped and terminated rather
//! than length-prefixed.

const SIGN_BIT: u64 = 1 << 63;

/// Byte following `0x00` for a literal zero inside an ordered byte string.
pub const ESCAPED_ZERO: u8 = 0x01;

/// Byte following `0x00` at the end of an ordered byte string.
pub const TERMINATOR: u8 = 0x00;

/// Maps an `i64` onto a `u64` with the same ordering.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn i64_to_ordered(value: i64) -> u64 {
    (value as u64) ^ SIGN_BIT
}

/// Inverse of [`i64_to_ordered`].
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn i64_from_ordered(value: u64) -> i64 {
    (value ^ SIGN_BIT) as i64
}

/// Maps an `f64` onto a `u64` with the same ordering (NaN excluded).
#[must_use]
pub fn f64_to_ordered(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

/// Inverse of [`f64_to_ordered`].
#[must_use]
pub fn f64_from_ordered(encoded: u64) -> f64 {
    let bits = if encoded & SIGN_BIT != 0 {
        encoded ^ SIGN_BIT
    } else {
        !encoded
    };
    f64::from_bits(bits)
}
