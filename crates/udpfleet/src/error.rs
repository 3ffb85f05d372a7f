//! Error types for the udpfleet client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io;
use thiserror::Error;
use udpfleet_protocol::ErrorCode;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors returned by [`FleetClient`](crate::FleetClient).
#[derive(Error, Debug)]
pub enum ClientError {
    /// A low-level socket error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something this client cannot interpret, or a
    /// message arrived out of sequence.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the handshake (usually a version mismatch).
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// The server answered a request with an error.
    #[error("Server error: {message}")]
    Server {
        message: String,
        code: Option<ErrorCode>,
    },

    /// A server message exceeded the client's size limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The server closed the connection.
    #[error("Connection closed by server")]
    Closed,
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
