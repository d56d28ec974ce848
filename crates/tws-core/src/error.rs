//! Error types for tws.
//!
//! Every failure the engine can observe is recoverable at the message level.
//! Inbound failures are logged and the message is dropped; only a caller's own
//! call future ever sees `Timeout`, `ChannelClosed` or a decoded output, and
//! `send` reports `Transport` directly.

use thiserror::Error;

/// Main error type for tws.
#[derive(Debug, Error)]
pub enum TwsError {
    // Duplex channel errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Timed out waiting for response to {correlation_id}")]
    Timeout { correlation_id: String },

    #[error("Channel closed before {correlation_id} received a response")]
    ChannelClosed { correlation_id: String },

    // Protocol errors
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Dispatch failed for operation \"{operation}\": {message}")]
    Dispatch { operation: String, message: String },

    #[error("Unknown envelope kind \"{0}\"")]
    UnknownEnvelopeKind(String),

    // Unary client errors
    #[error("Server responded with status code {status}")]
    Server { status: u16, body: String },

    #[error("Server responded with invalid JSON")]
    InvalidResponse { body: String },

    #[error("Server responded with error: {message}")]
    Remote { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Failure to decode a wire message.
///
/// Envelope-level and payload-level failures are kept apart for diagnostics
/// even though the engine handles them the same way.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unknown envelope kind \"{0}\"")]
    UnknownKind(String),

    #[error("invalid payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Result type alias for tws operations.
pub type Result<T> = std::result::Result<T, TwsError>;

impl From<std::io::Error> for TwsError {
    fn from(err: std::io::Error) -> Self {
        TwsError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TwsError {
    fn from(err: serde_json::Error) -> Self {
        TwsError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TwsError {
    fn from(err: reqwest::Error) -> Self {
        TwsError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TwsError {
    /// Shorthand for a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        TwsError::Transport {
            message: message.into(),
        }
    }

    /// Correlation id attached to a call-level failure, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            TwsError::Timeout { correlation_id } | TwsError::ChannelClosed { correlation_id } => {
                Some(correlation_id)
            }
            _ => None,
        }
    }

    /// Whether the call may succeed if issued again on a live channel.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TwsError::Timeout { .. }
                | TwsError::ChannelClosed { .. }
                | TwsError::Transport { .. }
                | TwsError::Network { .. }
        )
    }
}
