//! Crate-level error types.
//!
//! [`TvError`] unifies every failure the protocol core can produce
//! (remote protocol errors, deadlines, transport loss, bad input) behind a
//! single enum so callers can match on the variant they care about while
//! still using the `?` operator for easy propagation.

use std::time::Duration;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TvError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum TvError {
    /// The remote sent a message whose name contains `error`.
    #[error("protocol error \"{message}\": {payload}")]
    Protocol {
        message: String,
        payload: serde_json::Value,
    },

    /// A session did not complete before its deadline.
    #[error("{what} should be done within {limit:?}")]
    Timeout { what: String, limit: Duration },

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The remote closed the socket while a session was still open.
    #[error("connection closed by remote")]
    ConnectionClosed,

    /// The request was rejected before any session was opened.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The environment holds an inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The credential provider failed to issue a token.
    #[error("credential error: {0}")]
    Credential(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TvError {
    /// Returns `true` for failures a long-lived stream should reconnect after.
    ///
    /// Input and configuration problems will fail the same way on every
    /// attempt, so they are surfaced instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Timeout { .. }
                | Self::WebSocket(_)
                | Self::ConnectionClosed
                | Self::Json(_)
        )
    }
}
