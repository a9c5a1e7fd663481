//! Error taxonomy for the streaming engine and its transport collaborator.

use thiserror::Error;

use crate::records::{ConnectionIssue, DisconnectNotice};

/// A single stream record that could not be decoded. Always transient:
/// the stream keeps reading past it.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON, or a recognized shape failed to
    /// deserialize into its concrete type.
    #[error("Record decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed as JSON but matched no known record shape.
    #[error("Record shape not recognized: {reason}")]
    UnknownShape { reason: String },
}

/// Errors surfaced by the stream engine, transient and terminal.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A malformed record. The stream continues; this is reported through
    /// the error channel / transient-error callback only.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The server ended the stream with an in-band disconnection record.
    #[error("Server ended the stream ({} disconnect(s), {} connection issue(s))", disconnects.len(), issues.len())]
    Disconnected {
        disconnects: Vec<DisconnectNotice>,
        issues: Vec<ConnectionIssue>,
    },

    /// No frame (not even a keep-alive) arrived within the heartbeat
    /// window. The connection is considered dead.
    #[error("No frames received for {idle_ms}ms")]
    HeartbeatTimeout { idle_ms: u64 },

    /// The caller's stop token fired (or its deadline expired).
    #[error("Stream cancelled by caller")]
    Cancelled,

    /// The byte stream ended without a disconnection record.
    #[error("Stream closed unexpectedly")]
    Closed,

    /// The underlying transport failed mid-stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame exceeded the configured size cap.
    #[error("Frame exceeds the {max}-byte cap")]
    FrameTooLarge { max: usize },
}

impl StreamError {
    /// Returns `true` if the stream remains usable after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns `true` if the stream is unusable and the connection has
    /// been (or is being) torn down.
    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised while opening a stream, before any frame is read.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_transient() {
        let err: StreamError = DecodeError::UnknownShape {
            reason: "no data key".into(),
        }
        .into();
        assert!(err.is_transient());
        assert!(!err.is_terminal());
    }

    #[test]
    fn terminal_errors() {
        assert!(StreamError::Closed.is_terminal());
        assert!(StreamError::Cancelled.is_terminal());
        assert!(StreamError::HeartbeatTimeout { idle_ms: 30_000 }.is_terminal());
        assert!(StreamError::Disconnected {
            disconnects: vec![],
            issues: vec![],
        }
        .is_terminal());
    }
}
