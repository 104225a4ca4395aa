//! Local filesystem blob store backend.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{Metadata, ObjectId};
use object_store::{local::LocalFileSystem, path::Path, ObjectStore, PutPayload};
use tracing::debug;

use crate::{BlobError, BlobResult, BlobStore, StoredBlob};

const METADATA_DIR: &str = ".meta";

/// Stores each object as `<root>/<id>` with its metadata in
/// `<root>/.meta/<id>.json`. Writes go through a staging file that is renamed
/// into place, so readers never observe a partial object.
pub struct LocalBlobStore {
    object_store: Arc<dyn ObjectStore>,
}

impl LocalBlobStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let object_store = LocalFileSystem::new_with_prefix(&root)?;
        debug!(root = %root.display(), "opened local blob store");
        Ok(Self {
            object_store: Arc::new(object_store),
        })
    }

    fn data_path(id: &ObjectId) -> Path {
        Path::from(id.get())
    }

    fn metadata_path(id: &ObjectId) -> Path {
        Path::from(METADATA_DIR).child(format!("{}.json", id.get()))
    }

    async fn read_metadata(&self, id: &ObjectId) -> BlobResult<Metadata> {
        let raw = match self.object_store.get(&Self::metadata_path(id)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(Metadata::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| BlobError::MetadataError {
            id: id.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, id: &ObjectId) -> BlobResult<bool> {
        match self.object_store.head(&Self::data_path(id)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &ObjectId) -> BlobResult<Option<StoredBlob>> {
        let data = match self.object_store.get(&Self::data_path(id)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = self.read_metadata(id).await?;
        Ok(Some(StoredBlob { data, metadata }))
    }

    async fn store(&self, id: &ObjectId, data: Bytes, metadata: Metadata) -> BlobResult<()> {
        // Metadata lands first so a visible object always has its sidecar.
        let encoded = serde_json::to_vec(&metadata).map_err(|e| BlobError::MetadataError {
            id: id.to_string(),
            source: e,
        })?;
        self.object_store
            .put(&Self::metadata_path(id), PutPayload::from(encoded))
            .await?;
        self.object_store
            .put(&Self::data_path(id), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn existing(&self) -> BlobResult<Vec<ObjectId>> {
        // Top level only: the sidecar directory and any other subdirectory
        // come back as common prefixes.
        let listing = self.object_store.list_with_delimiter(None).await?;
        let mut ids = Vec::with_capacity(listing.objects.len());
        for object in listing.objects {
            let Some(name) = object.location.filename() else {
                continue;
            };
            match ObjectId::parse(name) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(file = %name, "skipping foreign file in blob store"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
