//! Writes units to the destination store.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ferry_storage::{Body, StoreHandle};

/// Writes each unit as one object in the destination store.
#[derive(Clone)]
pub struct Publisher {
    store: StoreHandle,
}

impl Publisher {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Stream `body` to `key`, returning the stored location.
    pub async fn publish(&self, key: &str, body: Body) -> Result<String> {
        self.store.put(key, body).await.or_raise(|| ErrorKind::Publish(key.to_string()))
    }

    /// Wait for the store to finish cleaning up after abandoned uploads.
    pub async fn settle(&self) {
        self.store.settle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_storage::ObjectStore;
    use ferry_storage::backend::MockStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish() {
        let store = Arc::new(MockStore::default());
        let publisher = Publisher::new(store.clone());
        let location = publisher.publish("out/a.txt", Body::from_bytes(&b"alpha"[..])).await.unwrap();
        assert_eq!(location, "mock://mock/out/a.txt");
        assert_eq!(&store.get("out/a.txt").await.unwrap()[..], b"alpha");
    }

    #[tokio::test]
    async fn test_publish_failure_names_key() {
        let store = Arc::new(MockStore::default().failing_put("out/a.txt"));
        let err = Publisher::new(store).publish("out/a.txt", Body::from_bytes(&b"alpha"[..])).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Publish("out/a.txt".to_string()));
    }
}
