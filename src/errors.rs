//! Custom error types for AlertLink node operations
//!
//! Only conditions a caller can act on are errors here. A sensor timeout is a
//! `None` sample, a stale acknowledgment is a discarded outcome, and storage
//! corruption is repaired at startup and reported, not raised.
use std::io;

use thiserror::Error;

/// Result type alias for AlertLink operations
pub type Result<T> = std::result::Result<T, AlertLinkError>;

/// AlertLink error enumeration
///
/// Covers the failure modes that cross a module boundary:
/// - Transport and store I/O failures
/// - Inbound lines that are not valid commands
/// - Invalid node configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertLinkError {
    /// I/O error (link read/write or store file failure)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Inbound line has a known verb but an unusable shape
    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),

    /// Inbound line starts with a verb this side does not handle
    #[error("Unknown verb: {0:?}")]
    UnknownVerb(String),

    /// Outbound payload would break the `|`-separated line grammar
    #[error("Payload contains a field separator or line break")]
    PayloadContainsSeparator,

    /// Configuration rejected by the builder
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Store access past the end of the addressable region
    #[error("Store access out of bounds: offset {offset} + len {len} exceeds capacity {capacity}")]
    StoreOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// Convert from io::Error to AlertLinkError
impl From<io::Error> for AlertLinkError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
