// Bounds-checked sequential reader over an immutable byte buffer.
//
// This is the only place that indexes raw input. Every other decoder reads
// through a `ByteCursor` (or a sub-cursor carved out with `region`).

use super::error::DecodeError;
use super::varint;

/// Sequential reader with a read position.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read one byte, failing with `EndOfBuffer` once exhausted.
    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.data.get(self.pos).ok_or(DecodeError::EndOfBuffer)?;
        self.pos += 1;
        Ok(byte)
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current read offset from the start of the buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Total length of the underlying buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read exactly `n` bytes as a borrowed slice.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::EndOfBuffer)?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.read_byte()
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        self.read_array::<8>().map(u64::from_le_bytes)
    }

    /// Read one ULEB128 varint.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        varint::decode(self)
    }

    /// Carve out an independent cursor over `[start, start+len)` of the
    /// whole buffer (not relative to the read position).
    ///
    /// `what` names the region in the `OutOfBounds` error.
    pub fn region(
        &self,
        what: &'static str,
        start: u64,
        len: u64,
    ) -> Result<ByteCursor<'a>, DecodeError> {
        let oob = || DecodeError::OutOfBounds {
            what,
            start,
            len,
            buffer_len: self.data.len(),
        };
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > self.data.len() as u64 {
            return Err(oob());
        }
        // Both fit in usize: end <= data.len().
        let (start, end) = (start as usize, end as usize);
        Ok(ByteCursor::new(&self.data[start..end]))
    }
}
