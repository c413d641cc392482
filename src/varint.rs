//! Unsigned varint encoding helpers.
//!
//! BLIP uses Google-style unsigned varints (seven data bits per byte,
//! continuation bit `0x80` on all but the last) for message numbers,
//! property-block lengths, and ACK byte counts. The actual bit twiddling
//! is delegated to `bytes-varint`; these helpers pin down the error
//! mapping and provide `size_of` for pre-sizing buffers.

use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::error::{BlipError, Result};

/// Maximum encoded width of a `u64` varint.
pub const MAX_WIDTH: usize = 10;

/// Append `value` to `buf` as a varint.
pub fn put(buf: &mut impl BufMut, value: u64) {
    buf.put_u64_varint(value);
}

/// Read a varint from the front of `buf`, advancing it.
///
/// Fails with [`BlipError::TruncatedVarint`] if the input ends before the
/// continuation bit clears, or if the continuation bit is still set at
/// the tenth byte.
pub fn try_get(buf: &mut impl Buf) -> Result<u64> {
    buf.try_get_u64_varint()
        .map_err(|_| BlipError::TruncatedVarint)
}

/// Encoded width of `value` in bytes (1..=10).
pub fn size_of(value: u64) -> usize {
    match value {
        0 => 1,
        v => (70 - v.leading_zeros() as usize) / 7,
    }
}
