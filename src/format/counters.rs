// Counter file decoding: back-to-back varints, no header, no delimiters.
//
// Position `i` holds the execution count for `CounterId(i)`.

use super::cursor::ByteCursor;
use super::error::DecodeError;
use super::meta::CounterId;
use super::varint;

/// Ordered execution counts; the index is the join key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    counts: Vec<u64>,
}

impl CounterSnapshot {
    pub fn new(counts: Vec<u64>) -> Self {
        Self { counts }
    }

    /// Decode a counter buffer.
    ///
    /// Ends normally when the buffer is exhausted between values. A value cut
    /// off mid-way is `InvalidFormat`.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut c = ByteCursor::new(data);
        // Every value takes at least one byte.
        let mut counts = Vec::with_capacity(data.len());
        while !c.at_end() {
            let at = c.position();
            let value = varint::decode(&mut c).map_err(|e| match e {
                DecodeError::Truncated => DecodeError::invalid(format!(
                    "counter {} truncated at byte offset {at}",
                    counts.len()
                )),
                other => other,
            })?;
            counts.push(value);
        }
        Ok(Self { counts })
    }

    /// Count for `id`, or `None` if the snapshot is shorter than the metadata.
    #[inline]
    pub fn get(&self, id: CounterId) -> Option<u64> {
        self.counts.get(id.index()).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.counts
    }

    pub fn into_inner(self) -> Vec<u64> {
        self.counts
    }

    /// Encode back to the on-disk varint stream.
    pub fn encode(&self) -> Vec<u8> {
        encode_counters(&self.counts)
    }
}

impl From<Vec<u64>> for CounterSnapshot {
    fn from(counts: Vec<u64>) -> Self {
        Self { counts }
    }
}

/// Decode a counter buffer into plain counts.
pub fn decode_counters(data: &[u8]) -> Result<Vec<u64>, DecodeError> {
    CounterSnapshot::decode(data).map(CounterSnapshot::into_inner)
}

/// Encode counts as a varint stream.
pub fn encode_counters(counts: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(counts.len());
    for &count in counts {
        varint::push_u64(&mut out, count);
    }
    out
}
