// Decode error taxonomy.
//
// Callers branch on `ErrorKind`, never on the rendered message.

use thiserror::Error;

/// Coarse classification shared by every error the agent can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad magic, truncated or overflowed varint, index out of range.
    Format,
    /// An offset, length or table extent exceeds the buffer.
    OutOfBounds,
    /// Listener bind failure or collaborator I/O failure.
    Resource,
    /// Snapshot observed while the producer was writing; worth retrying.
    TransientCapture,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Format => "format",
            Self::OutOfBounds => "out-of-bounds",
            Self::Resource => "resource",
            Self::TransientCapture => "transient-capture",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding metadata or counter buffers.
///
/// Decoding is all-or-nothing: any of these aborts the whole decode and no
/// partial result is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A single-byte read ran past the end of the buffer.
    #[error("unexpected end of buffer")]
    EndOfBuffer,

    /// A varint continuation sequence ended without a terminating byte.
    #[error("varint truncated (missing terminating byte)")]
    Truncated,

    /// A varint does not fit in 64 bits.
    #[error("varint overflow (exceeds 64 bits)")]
    Overflow,

    /// Structurally invalid input.
    #[error("invalid format: {reason}")]
    InvalidFormat { reason: String },

    /// A declared region does not fit inside the buffer.
    #[error("{what} out of bounds: [{start}, {start}+{len}) exceeds buffer of {buffer_len} bytes")]
    OutOfBounds {
        what: &'static str,
        start: u64,
        len: u64,
        buffer_len: usize,
    },

    /// Decoding would exceed a configured resource limit.
    #[error("{what} limit exceeded: {requested} > {limit}")]
    LimitExceeded {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
}

impl DecodeError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::EndOfBuffer
            | Self::Truncated
            | Self::Overflow
            | Self::InvalidFormat { .. }
            | Self::LimitExceeded { .. } => ErrorKind::Format,
        }
    }
}

impl From<DecodeError> for std::io::Error {
    fn from(e: DecodeError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}
