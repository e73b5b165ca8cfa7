//! Archives already in the store, republished entry by entry.

use super::{ItemStream, Source, SourceItem, Unit};
use crate::error::{ErrorKind, Result};
use crate::key::ArchiveKeys;
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use ferry_archive::{Archive, Entry};
use ferry_storage::{Body, StoreHandle};
use futures::StreamExt;

/// Lists archives under a prefix and expands each into its entries.
pub struct ArchiveSource {
    store: StoreHandle,
    keys: ArchiveKeys,
}

impl ArchiveSource {
    pub fn new(store: StoreHandle, keys: ArchiveKeys) -> Self {
        Self { store, keys }
    }
}

#[async_trait]
impl Source for ArchiveSource {
    type Content = Bytes;
    type Entry = Entry;

    fn name(&self) -> &str {
        "unzip"
    }

    fn enumerate(&self) -> ItemStream<'_> {
        let scope = format!("{}/{}", self.store.name(), self.keys.source_prefix());
        Box::pin(self.store.list_stream(self.keys.source_prefix()).map(move |listed| {
            listed
                .map(|info| SourceItem::new(info.key, Some(info.size)))
                .or_raise(|| ErrorKind::Enumeration(scope.clone()))
        }))
    }

    async fn fetch(&self, item: &SourceItem) -> Result<Bytes> {
        self.store.get(&item.id).await.or_raise(|| ErrorKind::Fetch(item.id.clone()))
    }

    fn expand(&self, item: &SourceItem, content: Bytes) -> Result<Vec<Unit<Entry>>> {
        let archive = Archive::from_bytes(content).or_raise(|| ErrorKind::Decode(item.id.clone()))?;
        Ok(archive.entries().into_iter().map(|entry| Unit { name: entry.name().to_string(), entry }).collect())
    }

    async fn open(&self, unit: Unit<Entry>) -> Result<Body> {
        let entry = unit.entry;
        // Decompression happens on the blocking pool while the upload reads.
        Ok(Body::from_blocking(move |writer| entry.copy_to(writer).map(|_| ())))
    }

    fn destination_key(&self, item: &SourceItem, unit_name: &str) -> String {
        self.keys.derive(&item.id, unit_name)
    }
}
