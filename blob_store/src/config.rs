//! Blob storage configuration.

use std::{env, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult, BlobStore, LocalBlobStore, MemoryBlobStore};

const MEMORY_SCHEME: &str = "memory://";
const FILE_SCHEME: &str = "file://";

/// Where a blob-server keeps its objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobStorageConfig {
    /// `file:///path`, a plain directory path, or `memory://`.
    #[serde(default = "default_blob_store_path")]
    pub path: String,
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        Self {
            path: default_blob_store_path(),
        }
    }
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_SCHEME
    }

    /// Directory of a filesystem-backed store, `None` for in-memory storage.
    pub fn local_dir(&self) -> BlobResult<Option<PathBuf>> {
        if self.is_memory() {
            return Ok(None);
        }
        let path = self.path.strip_prefix(FILE_SCHEME).unwrap_or(&self.path);
        if path.is_empty() {
            return Err(BlobError::InvalidPath {
                path: self.path.clone(),
                reason: "empty directory".to_string(),
            });
        }
        if path.contains("://") {
            return Err(BlobError::InvalidPath {
                path: self.path.clone(),
                reason: "unsupported scheme".to_string(),
            });
        }
        Ok(Some(PathBuf::from(path)))
    }

    /// Opens the configured backend.
    pub async fn build(&self) -> BlobResult<Arc<dyn BlobStore>> {
        match self.local_dir()? {
            Some(dir) => Ok(Arc::new(LocalBlobStore::open(dir).await?)),
            None => Ok(Arc::new(MemoryBlobStore::new())),
        }
    }
}

/// Default blob store path (local filesystem).
pub fn default_blob_store_path() -> String {
    format!(
        "{}{}",
        FILE_SCHEME,
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("sos_storage/blobs")
            .to_str()
            .unwrap_or("./sos_storage/blobs")
    )
}
