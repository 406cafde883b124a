// ULEB128 variable-length integer encoding.
//
// Base-128, little-endian: least-significant 7-bit group first.
// Each byte has bit 7 set except the final byte.

use super::cursor::ByteCursor;
use super::error::DecodeError;

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// The 10th byte may only carry bit 63.
const LAST_BYTE_MAX: u8 = 0x01;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into `buf`, returning the number of bytes written (1..=10).
///
/// The encoded bytes are `buf[..len]`.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let group = (num & 0x7F) as u8;
        num >>= 7;
        if num == 0 {
            buf[i] = group;
            return i + 1;
        }
        buf[i] = group | 0x80;
        i += 1;
    }
}

/// Encode a `u64` into a freshly allocated vector.
pub fn encode_to_vec(num: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    buf[..len].to_vec()
}

/// Append the encoding of a `u64` to `out`.
#[inline]
pub fn push_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one varint from `cursor`.
///
/// Fails with `Truncated` if the cursor runs dry before a terminating byte
/// and with `Overflow` if the value needs more than 64 bits. On failure the
/// cursor position is unspecified; callers abandon the decode.
pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<u64, DecodeError> {
    let mut val: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = cursor.read_byte().map_err(|_| DecodeError::Truncated)?;
        if i == MAX_VARINT_LEN - 1 && byte > LAST_BYTE_MAX {
            return Err(DecodeError::Overflow);
        }
        val |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
    Err(DecodeError::Overflow)
}

/// Decode a `u64` from the front of a byte slice.
/// Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut cursor = ByteCursor::new(data);
    let val = decode(&mut cursor)?;
    Ok((val, cursor.position()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return the encoded byte-length of a `u64` value.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}
