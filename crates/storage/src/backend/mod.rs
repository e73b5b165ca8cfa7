//! Object store trait and implementations.
//!
//! This module defines the `ObjectStore` trait, which provides the three
//! operations a batch transfer needs from a bucket: paged listing, whole
//! object reads, and streamed writes.

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "mock")]
pub use self::mock::MockStore;
#[cfg(feature = "s3")]
pub use self::s3::S3Store;
use crate::body::Body;
use crate::error::Result;
use crate::models::{ObjectInfo, Page};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;

/// Unified interface for object store backends.
///
/// All operations are asynchronous to efficiently handle network operations
/// and concurrent access from many transfer tasks at once.
///
/// # Keys
/// Keys are passed through exactly as given (after
/// [`validate_key`](crate::validate_key)); backends never normalize them.
///
/// # Examples
///
/// ```
/// use ferry_storage::{ObjectStore, error::Result};
///
/// async fn size_of_archive(store: &dyn ObjectStore) -> Result<usize> {
///     let data = store.get("new-bucket/2024-01-01/path/archive.zip").await?;
///     Ok(data.len())
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the store (bucket name for S3), used for logging only.
    fn name(&self) -> &str;

    /// Fetch a single page of object metadata under `prefix`.
    ///
    /// Pass `None` for the first page and the previous page's
    /// [`next`](Page::next) token afterwards.
    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<Page>;

    /// Stream object metadata under `prefix`, one page at a time.
    ///
    /// Only one page is held in memory at once. A failed page request is
    /// yielded as an `Err` and ends the stream; it is up to the caller
    /// whether that aborts their work.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use ferry_storage::{ObjectStore, error::Result};
    /// # async fn example(store: &dyn ObjectStore) -> Result<()> {
    /// let mut stream = store.list_stream("new-bucket/");
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.key, info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: &'a str) -> ObjectInfoStream<'a> {
        Box::pin(stream! {
            let mut token = None;
            let mut number = 0usize;
            loop {
                number += 1;
                let page = match self.list_page(prefix, token.take()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                tracing::debug!(store = self.name(), prefix, page = number, items = page.items.len(), "Listed page");
                let next = page.next;
                for info in page.items {
                    yield Ok(info);
                }
                match next {
                    Some(next) => token = Some(next),
                    None => return,
                }
            }
        })
    }

    /// List every object under `prefix`.
    ///
    /// Collects [`list_stream()`](Self::list_stream) into a [`Vec`]; avoid
    /// for prefixes with unbounded contents.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Read an entire object into memory.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write a body to `key` as a single object, replacing any existing one.
    ///
    /// Backends should stream the body rather than buffer it whole where the
    /// transport allows. Returns the stored location.
    async fn put(&self, key: &str, body: Body) -> Result<String>;

    /// Wait for background cleanup left behind by writes that were dropped
    /// part-way, such as aborting an unfinished multipart upload.
    async fn settle(&self) {}
}
