//! Sources of work for a run.
//!
//! A [`Source`] describes one kind of transfer end to end: how to list its
//! items, read one, split it into units, open a unit for upload and name the
//! object it becomes. The coordinator drives any source the same way.

mod archive;
mod tree;

pub use self::archive::ArchiveSource;
pub use self::tree::TreeSource;
use crate::error::Result;
use async_trait::async_trait;
use ferry_storage::Body;
use futures::Stream;
use std::pin::Pin;

pub type ItemStream<'a> = Pin<Box<dyn Stream<Item = Result<SourceItem>> + Send + 'a>>;

/// One piece of input discovered by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Object key or remote path.
    pub id: String,
    /// Size in bytes, as reported by the listing.
    pub size: Option<u64>,
}
impl SourceItem {
    pub fn new(id: impl Into<String>, size: Option<u64>) -> Self {
        Self { id: id.into(), size }
    }
}

/// One payload bound for the destination store, not yet opened.
#[derive(Debug)]
pub struct Unit<E> {
    /// Entry name, or the path for mirrored files.
    pub name: String,
    pub entry: E,
}

#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Whatever [`fetch`](Self::fetch) produces for one item.
    type Content: Send + 'static;
    /// Handle for one unit until it is opened.
    type Entry: Send + 'static;

    /// Short name for logging.
    fn name(&self) -> &str;

    /// Every item to transfer, one page at a time.
    ///
    /// Errors are raised as [`Enumeration`](crate::error::ErrorKind::Enumeration).
    fn enumerate(&self) -> ItemStream<'_>;

    /// Read one item. Errors are raised as [`Fetch`](crate::error::ErrorKind::Fetch).
    async fn fetch(&self, item: &SourceItem) -> Result<Self::Content>;

    /// Split fetched content into units, in order.
    ///
    /// Errors are raised as [`Decode`](crate::error::ErrorKind::Decode).
    fn expand(&self, item: &SourceItem, content: Self::Content) -> Result<Vec<Unit<Self::Entry>>>;

    /// Open a unit for upload. Errors are raised as [`Publish`](crate::error::ErrorKind::Publish).
    async fn open(&self, unit: Unit<Self::Entry>) -> Result<Body>;

    /// Destination key for unit `unit_name` of `item`.
    fn destination_key(&self, item: &SourceItem, unit_name: &str) -> String;
}
