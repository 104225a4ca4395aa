//! In-memory blob store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{Metadata, ObjectId};
use tokio::sync::RwLock;

use crate::{BlobResult, BlobStore, StoredBlob};

/// Keeps every object in a process-local map. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ObjectId, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, id: &ObjectId) -> BlobResult<bool> {
        Ok(self.blobs.read().await.contains_key(id))
    }

    async fn get(&self, id: &ObjectId) -> BlobResult<Option<StoredBlob>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }

    async fn store(&self, id: &ObjectId, data: Bytes, metadata: Metadata) -> BlobResult<()> {
        self.blobs
            .write()
            .await
            .insert(id.clone(), StoredBlob { data, metadata });
        Ok(())
    }

    async fn existing(&self) -> BlobResult<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self.blobs.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryBlobStore::new();
        let id = ObjectId::parse("abc").unwrap();

        assert!(store.existing().await.unwrap().is_empty());
        assert!(!store.exists(&id).await.unwrap());

        let mut metadata = Metadata::new();
        metadata.insert("X-Owner".to_string(), "steve".to_string());
        store
            .store(&id, Bytes::from("hello"), metadata.clone())
            .await
            .unwrap();

        assert!(store.exists(&id).await.unwrap());
        let blob = store.get(&id).await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from("hello"));
        assert_eq!(blob.metadata, metadata);
        assert_eq!(store.existing().await.unwrap(), vec![id]);
    }
}
