//! Storage models.
//!
//! These types describe objects as reported by a backend's listing
//! operations.

use time::OffsetDateTime;

/// Object metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key within the bucket
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp, when the backend reports one
    pub modified: Option<OffsetDateTime>,
}
impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self { key: key.into(), size, modified: None }
    }

    pub fn with_modified(mut self, modified: OffsetDateTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// One page of a listing.
///
/// `next` carries the opaque continuation token for the following page, and
/// is `None` once the backend has nothing more to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<ObjectInfo>,
    pub next: Option<String>,
}
impl Page {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}
