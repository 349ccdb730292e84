//! Error types for the handshake bootstrap
//!
//! Construction-time failures (`BindExhausted`) are fatal for the server.
//! Everything else is scoped to a single connection: the listener stays
//! valid and the caller may accept again.

use std::io;

/// Result type alias for bootstrap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Handshake bootstrap error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every port in the retry range failed to bind
    #[error("no bindable port in range: {last_error}")]
    BindExhausted {
        /// Message of the last underlying bind error
        last_error: String,
    },

    /// The accept call failed or timed out
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// The request carried no `GET <path> HTTP/<version>` line
    #[error("malformed handshake request (no GET line): {request:?}")]
    MalformedRequest {
        /// Raw request text as received, for diagnostics
        request: String,
    },

    /// The request carried no `Sec-WebSocket-Key` header
    #[error("handshake request missing Sec-WebSocket-Key: {request:?}")]
    MissingKey {
        /// Raw request text as received, for diagnostics
        request: String,
    },

    /// The 101 response could not be written back
    #[error("failed to write handshake response: {0}")]
    WriteFailed(#[source] io::Error),

    /// I/O failure while reading the request
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if the error aborts server startup rather than a
    /// single connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::BindExhausted { .. })
    }
}
