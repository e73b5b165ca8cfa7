//! Remote filesystem access for ferry.
//!
//! A [`RemoteFs`] lists directories and opens files on a remote host. The
//! depth-first [`walk`](RemoteFs::walk) is built on top of
//! [`list_dir`](RemoteFs::list_dir), so backends only implement the two
//! primitive operations. Credentials for a session come from a
//! [`CredentialProvider`].

pub mod credentials;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod sftp;

pub use crate::credentials::{CredentialProvider, Credentials, StaticCredentials};
#[cfg(feature = "secrets")]
pub use crate::credentials::SecretsManagerProvider;
use crate::error::Result;
#[cfg(feature = "mock")]
pub use crate::mock::MockFs;
pub use crate::sftp::{SftpFs, SftpOptions};
use async_stream::stream;
use async_trait::async_trait;
use ferry_storage::Body;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub type RemoteHandle = Arc<dyn RemoteFs + Send + Sync>;
pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<RemoteEntry>> + Send + 'a>>;

/// A file or directory found on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute path on the remote host.
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes, when the server reports one.
    pub size: Option<u64>,
}
impl RemoteEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self { path: path.into(), is_dir: false, size: Some(size) }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self { path: path.into(), is_dir: true, size: None }
    }
}

#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Name of the remote (usually the host), used for logging only.
    fn name(&self) -> &str;

    /// Immediate children of `dir`, excluding `.` and `..`.
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>>;

    /// Open a file for streaming reads.
    async fn open(&self, path: &str) -> Result<Body>;

    /// Walk the tree under `root` depth-first, in lexical order per directory.
    ///
    /// Both files and directories are yielded (the root itself is not). A
    /// failure to list `root` is yielded as an `Err` and ends the stream. A
    /// failure to list a nested directory is logged and that subtree is
    /// skipped, so one unreadable directory does not hide the rest of the tree.
    fn walk<'a>(&'a self, root: &'a str) -> EntryStream<'a> {
        Box::pin(stream! {
            let top = match self.list_dir(root).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let mut stack = vec![sorted(top).into_iter()];
            while let Some(level) = stack.last_mut() {
                let Some(entry) = level.next() else {
                    stack.pop();
                    continue;
                };
                let subdir = entry.is_dir.then(|| entry.path.clone());
                yield Ok(entry);
                if let Some(dir) = subdir {
                    match self.list_dir(&dir).await {
                        Ok(children) => stack.push(sorted(children).into_iter()),
                        Err(e) => tracing::warn!(remote = self.name(), dir = %dir, error = ?e, "Skipping unreadable directory"),
                    }
                }
            }
        })
    }
}

fn sorted(mut entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

/// Join a directory and a child name with exactly one separator.
pub(crate) fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}
