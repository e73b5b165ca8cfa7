//! In-memory object store for testing.

use crate::body::Body;
use crate::error::{ErrorKind, Result};
use crate::models::{ObjectInfo, Page};
use crate::{ObjectStore, validate_key};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory object store for testing.
///
/// Objects are stored in a sorted map behind a [`RwLock`], so listings come
/// back in key order like S3 and all trait methods can operate on `&self`.
/// Listing is paginated with a configurable page size so callers exercise
/// continuation tokens, and individual keys can be made to fail on read or
/// write.
///
/// # Examples
///
/// ```
/// use ferry_storage::{Body, ObjectStore, backend::MockStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::with_objects([("in/a.zip", &b"PK..."[..])]);
/// assert_eq!(&store.get("in/a.zip").await?[..], b"PK...");
///
/// store.put("out/a.txt", Body::from_bytes(&b"data"[..])).await?;
/// assert!(store.contains("out/a.txt").await);
/// # Ok(())
/// # }
/// ```
pub struct MockStore {
    name: String,
    page_size: usize,
    objects: RwLock<BTreeMap<String, Bytes>>,
    failing_gets: HashSet<String>,
    failing_puts: HashSet<String>,
    failing_page: Option<usize>,
    pages_listed: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MockStore {
    /// Create a mock store pre-populated with objects.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>) -> Self {
        let mut map = BTreeMap::new();
        for (key, data) in objects {
            let key = key.into();
            if validate_key(&key).is_err() {
                // The panic here is DELIBERATE. MockStore is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockStore::with_objects: invalid key {key:?}");
            }
            map.insert(key, data.into());
        }
        Self {
            name: "mock".to_string(),
            page_size: 1000,
            objects: RwLock::new(map),
            failing_gets: HashSet::new(),
            failing_puts: HashSet::new(),
            failing_page: None,
            pages_listed: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Change the number of objects returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every `get` of `key` fail with a network error.
    pub fn failing_get(mut self, key: impl Into<String>) -> Self {
        self.failing_gets.insert(key.into());
        self
    }

    /// Make every `put` to `key` fail with a network error.
    pub fn failing_put(mut self, key: impl Into<String>) -> Self {
        self.failing_puts.insert(key.into());
        self
    }

    /// Make the listing page with this 1-based number fail.
    pub fn failing_page(mut self, number: usize) -> Self {
        self.failing_page = Some(number);
        self
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Contents of an object, if present.
    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// All keys currently stored, in order.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub fn pages_listed(&self) -> usize {
        self.pages_listed.load(Ordering::SeqCst)
    }

    /// Number of `get` calls, successful or not.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put` calls, successful or not.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}
impl Default for MockStore {
    fn default() -> Self {
        let objects: [(&str, Bytes); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<Page> {
        let number = self.pages_listed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_page == Some(number) {
            exn::bail!(ErrorKind::Network(format!("injected failure listing page {number}")));
        }
        // Continuation tokens are the last key of the previous page.
        let guard = self.objects.read().await;
        let mut matching = guard
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| token.as_ref().is_none_or(|after| key.as_str() > after.as_str()))
            .map(|(key, data)| ObjectInfo::new(key.clone(), data.len() as u64));
        let items: Vec<ObjectInfo> = matching.by_ref().take(self.page_size).collect();
        let next = match matching.next() {
            Some(_) => items.last().map(|info| info.key.clone()),
            None => None,
        };
        Ok(Page { items, next })
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let key = validate_key(key)?;
        if self.failing_gets.contains(key) {
            exn::bail!(ErrorKind::Network(format!("injected failure reading {key}")));
        }
        self.objects.read().await.get(key).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))
    }

    async fn put(&self, key: &str, body: Body) -> Result<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let key = validate_key(key)?;
        // Drain the body first, so a failing producer surfaces the same way
        // it would against a real backend.
        let data = body.into_bytes().await.map_err(ErrorKind::Io)?;
        if self.failing_puts.contains(key) {
            exn::bail!(ErrorKind::Network(format!("injected failure writing {key}")));
        }
        self.objects.write().await.insert(key.to_string(), data);
        Ok(format!("mock://{}/{}", self.name, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MockStore::default();
        let location = store.put("a/b.txt", Body::from_bytes(&b"hello"[..])).await.unwrap();
        assert_eq!(location, "mock://mock/a/b.txt");
        assert_eq!(&store.get("a/b.txt").await.unwrap()[..], b"hello");
        assert_eq!(store.puts(), 1);
        assert_eq!(store.gets(), 1);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = MockStore::default();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_paginates_in_key_order() {
        let store = MockStore::with_objects([
            ("p/c", Bytes::from_static(b"3")),
            ("p/a", Bytes::from_static(b"1")),
            ("q/z", Bytes::from_static(b"0")),
            ("p/b", Bytes::from_static(b"2")),
        ])
        .with_page_size(2);
        let first = store.list_page("p/", None).await.unwrap();
        assert_eq!(first.items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(), ["p/a", "p/b"]);
        assert_eq!(first.next.as_deref(), Some("p/b"));
        let second = store.list_page("p/", first.next).await.unwrap();
        assert_eq!(second.items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(), ["p/c"]);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_exact_page_boundary_has_no_empty_trailing_page() {
        let store =
            MockStore::with_objects([("a", Bytes::from_static(b"1")), ("b", Bytes::from_static(b"2"))]).with_page_size(2);
        let keys: Vec<String> = store.list_stream("").map_ok(|i| i.key).try_collect().await.unwrap();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(store.pages_listed(), 1);
    }

    #[tokio::test]
    async fn test_failing_page_ends_stream_with_error() {
        let store = MockStore::with_objects([
            ("a", Bytes::from_static(b"1")),
            ("b", Bytes::from_static(b"2")),
            ("c", Bytes::from_static(b"3")),
        ])
        .with_page_size(1)
        .failing_page(2);
        let mut stream = store.list_stream("");
        assert_eq!(stream.try_next().await.unwrap().unwrap().key, "a");
        assert!(stream.try_next().await.is_err());
        drop(stream);
        assert_eq!(store.pages_listed(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MockStore::with_objects([("in", Bytes::from_static(b"x"))]).failing_get("in").failing_put("out");
        assert!(matches!(&*store.get("in").await.unwrap_err(), ErrorKind::Network(_)));
        assert!(store.put("out", Body::from_bytes(&b"y"[..])).await.is_err());
        assert!(!store.contains("out").await);
    }

    #[test]
    #[should_panic(expected = "invalid key")]
    fn test_with_objects_panics_on_bad_key() {
        MockStore::with_objects([("/escape", Bytes::from_static(b"bad"))]);
    }
}
