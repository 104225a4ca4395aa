//! Core blob store trait.

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{Metadata, ObjectId};

use crate::BlobResult;

/// An object as held by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub metadata: Metadata,
}

/// Persistence operations a blob-server needs from its backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether an object is stored under `id`.
    async fn exists(&self, id: &ObjectId) -> BlobResult<bool>;

    /// Content and metadata of `id`, or `None` if it is absent.
    async fn get(&self, id: &ObjectId) -> BlobResult<Option<StoredBlob>>;

    /// Stores `data` and `metadata` under `id`, replacing any previous
    /// object. Metadata must come back from [`BlobStore::get`] unchanged.
    async fn store(&self, id: &ObjectId, data: Bytes, metadata: Metadata) -> BlobResult<()>;

    /// Every stored id, sorted.
    async fn existing(&self) -> BlobResult<Vec<ObjectId>>;
}
