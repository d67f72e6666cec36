//! Error types for wiremux.

use thiserror::Error;

use crate::connection::{ConnectionId, ConnectionState};

/// Main error type for all wiremux operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during open/send/receive, wrapped with the action that
    /// was in progress and the id of the connection it happened on.
    #[error("an error occurred {action} (connection {connection_id}): {source}")]
    Transport {
        /// What the connection was doing when the error occurred.
        action: &'static str,
        /// Which connection the error occurred on.
        connection_id: ConnectionId,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Send or receive attempted after the connection failed or was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send or receive attempted before the connection was opened.
    #[error("operation not valid in connection state {state:?}")]
    InvalidState {
        /// The state the connection was in.
        state: ConnectionState,
    },

    /// Any operation attempted after the connection was disposed.
    #[error("connection disposed")]
    Disposed,

    /// Malformed frame on the wire (bad length prefix).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A state machine reached a branch that should be unreachable.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// The caller's cancellation token fired. Never wrapped as a
    /// transport error.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Check whether this error is a cancellation.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
