//! Error types for blob store operations.

use std::fmt;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors raised by a blob store backend. Any of these surfaces to HTTP
/// callers as a local persistence failure.
#[derive(Debug)]
pub enum BlobError {
    /// I/O error while reading or writing the backing storage.
    IoError { source: std::io::Error },

    /// The object store backing a filesystem store failed.
    ObjectStoreError { source: object_store::Error },

    /// The metadata sidecar of an object could not be encoded or decoded.
    MetadataError { id: String, source: serde_json::Error },

    /// The configured storage path cannot be used.
    InvalidPath { path: String, reason: String },

    /// Generic error.
    Other { source: anyhow::Error },
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::IoError { source } => write!(f, "I/O error: {}", source),
            BlobError::ObjectStoreError { source } => write!(f, "object store error: {}", source),
            BlobError::MetadataError { id, source } => {
                write!(f, "metadata error for {}: {}", id, source)
            }
            BlobError::InvalidPath { path, reason } => {
                write!(f, "invalid storage path '{}': {}", path, reason)
            }
            BlobError::Other { source } => write!(f, "blob store error: {}", source),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::IoError { source } => Some(source),
            BlobError::ObjectStoreError { source } => Some(source),
            BlobError::MetadataError { source, .. } => Some(source),
            BlobError::Other { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::IoError { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        BlobError::ObjectStoreError { source: err }
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Other { source: err }
    }
}
