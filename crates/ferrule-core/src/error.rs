//! Error types for ferrule-core

use std::time::Duration;
use thiserror::Error;

/// Result type alias for ferrule operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No CRLFCRLF between header block and body
    #[error("Headers are not terminated")]
    UnterminatedHeaders,

    /// Request line has fewer than two tokens
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Method token is not a known verb
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Status line has no numeric code
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    /// A header line without a colon
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    /// Message is, or declares itself, larger than the limit
    #[error("Message exceeds {0} bytes")]
    TooLarge(usize),
}

/// Error types for the ferrule HTTP engine
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Malformed message on the wire
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected during load or validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A middleware or authority was built without the material it needs
    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    /// Outbound connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Outbound request did not complete before its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
