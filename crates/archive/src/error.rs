//! Archive Error Types

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bytes are not a readable zip container. Don't retry with the same input.
    #[display("invalid archive: {_0}")]
    InvalidArchive(#[error(not(source))] String),
    /// The container is valid but uses a feature that cannot be read (encryption, unknown method, etc.)
    #[display("unsupported archive: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// A single entry could not be opened.
    #[display("unreadable entry: {_0}")]
    Entry(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Archives are decoded from bytes already in memory, so the same input
    /// always fails the same way.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
