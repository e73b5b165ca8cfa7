//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote filesystem or credential error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Could not reach the host or complete the SSH handshake.
    #[display("failed to connect to {_0}")]
    Connect(#[error(not(source))] String),
    /// The host rejected the supplied credentials.
    #[display("authentication failed for {_0}")]
    Auth(#[error(not(source))] String),
    /// Credentials could not be retrieved or parsed.
    #[display("credentials unavailable: {_0}")]
    Credentials(#[error(not(source))] String),
    /// Path does not exist on the remote host.
    #[display("remote path not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied for a remote path.
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Any other failure reported by the remote protocol.
    #[display("remote error: {_0}")]
    Protocol(#[error(not(source))] String),
    /// A blocking worker panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Protocol(_) | Self::Task)
    }
}
