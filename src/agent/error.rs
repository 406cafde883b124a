// Agent-side error types.
//
// Every error exposes `kind()` so the retry policy and the CLI branch on
// the classification rather than on message text.

use std::io;

use thiserror::Error;

use super::protocol::ProtocolError;
use crate::format::{DecodeError, ErrorKind};

/// Failure reported by a coverage store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The producer was mid-write; a later snapshot may succeed.
    #[error("snapshot not ready: {0}")]
    Transient(String),

    /// The store could not be read or written.
    #[error("coverage store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store does not implement the requested capability.
    #[error("coverage store does not support {0}")]
    Unsupported(&'static str),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::TransientCapture,
            Self::Io(_) | Self::Unsupported(_) => ErrorKind::Resource,
        }
    }
}

/// Failure of one export (capture, decode, emit).
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("snapshot failed: {0}")]
    Store(#[from] StoreError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("all {attempts} export attempts failed: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ExportError>,
    },
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Decode(e) => e.kind(),
            // Once retries run out a transient failure is a resource failure.
            Self::Exhausted { last, .. } => match last.kind() {
                ErrorKind::TransientCapture => ErrorKind::Resource,
                other => other,
            },
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// A snapshot taken while the producer is writing usually surfaces as a
    /// decode failure, so format and bounds errors are retried too.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::TransientCapture | ErrorKind::Format | ErrorKind::OutOfBounds => true,
            ErrorKind::Resource => false,
        }
    }
}

/// Fatal agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Resource
    }
}

/// Errors seen by the fetch/reset client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to agent at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error talking to agent: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The agent closed the connection without sending a report.
    #[error("agent closed the connection without a report (export failed on the agent)")]
    NoPayload,

    #[error("agent closed the connection before the terminator block")]
    MissingTerminator,

    #[error("unexpected reply from agent: {0:?}")]
    UnexpectedReply(String),

    #[error("report is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_transient_escalates_to_resource() {
        let err = ExportError::Exhausted {
            attempts: 3,
            last: Box::new(StoreError::Transient("mid-write".into()).into()),
        };
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(!err.is_retryable());
    }

    #[test]
    fn decode_failures_are_retryable() {
        let err = ExportError::from(DecodeError::Truncated);
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.is_retryable());

        let err = ExportError::from(StoreError::Unsupported("reset"));
        assert!(!err.is_retryable());
    }
}
