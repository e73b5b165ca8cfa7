//! Pipeline Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Every kind maps to the [`Stage`] it
//! was raised in, which decides how the coordinator reacts to it.

use crate::policy::Stage;
use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Listing the items to transfer failed.
    #[display("failed to enumerate {_0}")]
    Enumeration(#[error(not(source))] String),
    /// Reading one item failed.
    #[display("failed to fetch {_0}")]
    Fetch(#[error(not(source))] String),
    /// One item could not be expanded into units.
    #[display("failed to decode {_0}")]
    Decode(#[error(not(source))] String),
    /// Writing one unit to its destination key failed.
    #[display("failed to publish {_0}")]
    Publish(#[error(not(source))] String),
    /// A task panicked while running the given stage.
    #[display("task panicked during {_0}")]
    Task(#[error(not(source))] Stage),
}

impl ErrorKind {
    /// Stage of the pipeline this error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Enumeration(_) => Stage::Enumeration,
            Self::Fetch(_) => Stage::Fetch,
            Self::Decode(_) => Stage::Decode,
            Self::Publish(_) => Stage::Publish,
            Self::Task(stage) => *stage,
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Enumeration(_) | Self::Fetch(_) | Self::Publish(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Enumeration("s3-storage-dev".to_string()), Stage::Enumeration)]
    #[case(ErrorKind::Fetch("a.zip".to_string()), Stage::Fetch)]
    #[case(ErrorKind::Decode("a.zip".to_string()), Stage::Decode)]
    #[case(ErrorKind::Publish("root/a.txt".to_string()), Stage::Publish)]
    #[case(ErrorKind::Task(Stage::Decode), Stage::Decode)]
    fn test_stage(#[case] kind: ErrorKind, #[case] stage: Stage) {
        assert_eq!(kind.stage(), stage);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Task(Stage::Publish).to_string(), "task panicked during publish");
        assert!(!ErrorKind::Decode("a.zip".to_string()).is_retryable());
    }
}
