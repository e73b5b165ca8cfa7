//! In-memory remote filesystem for testing.

use crate::error::{ErrorKind, Result};
use crate::{RemoteEntry, RemoteFs};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::Body;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory remote filesystem for testing.
///
/// Files are registered by absolute path; their parent directories exist
/// implicitly. Empty directories can be added explicitly, and individual
/// directories or files can be made to fail.
///
/// # Examples
///
/// ```
/// use ferry_remote::{MockFs, RemoteFs};
/// use futures::TryStreamExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fs = MockFs::with_files([("/path/a.txt", &b"alpha"[..]), ("/path/sub/b.txt", &b"bravo"[..])]);
/// let paths: Vec<String> = fs.walk("/path").map_ok(|entry| entry.path).try_collect().await?;
/// assert_eq!(paths, ["/path/a.txt", "/path/sub", "/path/sub/b.txt"]);
/// # Ok(())
/// # }
/// ```
pub struct MockFs {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
    failing_dirs: HashSet<String>,
    failing_opens: HashSet<String>,
    listings: AtomicUsize,
    opens: AtomicUsize,
}

impl MockFs {
    /// Create a filesystem holding `files`.
    ///
    /// Panics if a path is not absolute.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>) -> Self {
        let mut map = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        for (path, data) in files {
            let path = path.into();
            if !path.starts_with('/') {
                // Same contract as MockStore: broken test setup should fail loudly.
                panic!("MockFs::with_files: path must be absolute: {path:?}");
            }
            let mut parent = path.as_str();
            while let Some((dir, _)) = parent.rsplit_once('/') {
                dirs.insert(if dir.is_empty() { "/".to_string() } else { dir.to_string() });
                parent = dir;
            }
            map.insert(path, data.into());
        }
        Self {
            files: map,
            dirs,
            failing_dirs: HashSet::new(),
            failing_opens: HashSet::new(),
            listings: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    /// Add an empty directory.
    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dirs.insert(dir.into());
        self
    }

    /// Make listing `dir` fail.
    pub fn failing_dir(mut self, dir: impl Into<String>) -> Self {
        self.failing_dirs.insert(dir.into());
        self
    }

    /// Make opening `path` fail.
    pub fn failing_open(mut self, path: impl Into<String>) -> Self {
        self.failing_opens.insert(path.into());
        self
    }

    /// Number of `list_dir` calls, successful or not.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Number of `open` calls, successful or not.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn is_child(dir: &str, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(dir.trim_end_matches('/')).and_then(|rest| rest.strip_prefix('/')) else {
            return false;
        };
        !rest.is_empty() && !rest.contains('/')
    }
}
impl Default for MockFs {
    fn default() -> Self {
        let files: [(&str, Bytes); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl RemoteFs for MockFs {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let dir = match dir.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        if self.failing_dirs.contains(dir) {
            exn::bail!(ErrorKind::PermissionDenied(dir.to_string()));
        }
        if !self.dirs.contains(dir) {
            exn::bail!(ErrorKind::NotFound(dir.to_string()));
        }
        let subdirs = self.dirs.iter().filter(|d| Self::is_child(dir, d)).map(|d| RemoteEntry::dir(d.clone()));
        let files = self
            .files
            .iter()
            .filter(|(path, _)| Self::is_child(dir, path))
            .map(|(path, data)| RemoteEntry::file(path.clone(), data.len() as u64));
        Ok(subdirs.chain(files).collect())
    }

    async fn open(&self, path: &str) -> Result<Body> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens.contains(path) {
            exn::bail!(ErrorKind::Protocol(format!("injected failure opening {path}")));
        }
        let data = self.files.get(path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_string())))?;
        Ok(Body::from_bytes(data))
    }
}
