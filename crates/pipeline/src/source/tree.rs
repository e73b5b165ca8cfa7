//! Files in a remote tree, mirrored one to one.

use super::{ItemStream, Source, SourceItem, Unit};
use crate::error::{ErrorKind, Result};
use crate::key::MirrorKeys;
use async_trait::async_trait;
use exn::ResultExt;
use ferry_remote::RemoteHandle;
use ferry_storage::Body;
use futures::StreamExt;

/// Walks a remote tree and copies every file.
pub struct TreeSource {
    fs: RemoteHandle,
    root: String,
    keys: MirrorKeys,
}

impl TreeSource {
    pub fn new(fs: RemoteHandle, root: impl Into<String>, keys: MirrorKeys) -> Self {
        Self { fs, root: root.into(), keys }
    }
}

#[async_trait]
impl Source for TreeSource {
    type Content = Body;
    type Entry = Body;

    fn name(&self) -> &str {
        "mirror"
    }

    fn enumerate(&self) -> ItemStream<'_> {
        let scope = format!("{}:{}", self.fs.name(), self.root);
        Box::pin(self.fs.walk(&self.root).filter_map(move |walked| {
            let item = match walked {
                Ok(entry) if entry.is_dir => None,
                Ok(entry) => Some(Ok(SourceItem::new(entry.path, entry.size))),
                Err(e) => Some(Err::<SourceItem, _>(e).or_raise(|| ErrorKind::Enumeration(scope.clone()))),
            };
            std::future::ready(item)
        }))
    }

    async fn fetch(&self, item: &SourceItem) -> Result<Body> {
        self.fs.open(&item.id).await.or_raise(|| ErrorKind::Fetch(item.id.clone()))
    }

    fn expand(&self, item: &SourceItem, content: Body) -> Result<Vec<Unit<Body>>> {
        Ok(vec![Unit { name: item.id.clone(), entry: content }])
    }

    async fn open(&self, unit: Unit<Body>) -> Result<Body> {
        Ok(unit.entry)
    }

    fn destination_key(&self, _item: &SourceItem, unit_name: &str) -> String {
        self.keys.derive(unit_name)
    }
}
