//! Single-node persistence for blob-servers.
//!
//! A [`BlobStore`] maps an [`ObjectId`](data_model::ObjectId) to its bytes and
//! the extension metadata that arrived with it. Two backends are provided:
//!
//! - [`LocalBlobStore`]: one file per object beneath a root directory, with
//!   metadata kept in a JSON sidecar.
//! - [`MemoryBlobStore`]: a process-local map, useful for tests and for
//!   throwaway nodes.
//!
//! Callers are expected to hand over ids that were already validated; the
//! `ObjectId` type makes that the only way to reach a backend.

mod backends;
mod config;
mod error;
mod traits;

pub use backends::{local::LocalBlobStore, memory::MemoryBlobStore};
pub use config::{default_blob_store_path, BlobStorageConfig};
pub use error::{BlobError, BlobResult};
pub use traits::{BlobStore, StoredBlob};
