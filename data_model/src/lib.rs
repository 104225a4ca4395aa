use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Header names carrying this prefix are persisted as object metadata and
/// forwarded at every hop. Matched case-insensitively.
pub const EXTENSION_PREFIX: &str = "x-";

/// Metadata key which also sets the content type on delivery to a client.
pub const MIME_TYPE_KEY: &str = "x-mime-type";

/// Group receiving every blob-server supplied on the command line.
pub const DEFAULT_GROUP: &str = "default";

pub type Metadata = BTreeMap<String, String>;

pub fn is_extension_key(key: &str) -> bool {
    let prefix = EXTENSION_PREFIX.as_bytes();
    key.len() > prefix.len() && key.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Keeps only the extension-prefixed entries of `entries`. The first value
/// wins when a key repeats.
pub fn extension_metadata<K, V, I>(entries: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut metadata = Metadata::new();
    for (key, value) in entries {
        let key = key.as_ref();
        if is_extension_key(key) && !metadata.contains_key(key) {
            metadata.insert(key.to_string(), value.into());
        }
    }
    metadata
}

pub fn mime_type(metadata: &Metadata) -> Option<&str> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(MIME_TYPE_KEY))
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataModelError {
    InvalidId { id: String },
    InvalidLocation { location: String, reason: String },
    EmptyGroup { location: String },
}

impl Display for DataModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataModelError::InvalidId { .. } => write!(f, "alphanumeric IDs only"),
            DataModelError::InvalidLocation { location, reason } => {
                write!(f, "invalid blob-server location '{}': {}", location, reason)
            }
            DataModelError::EmptyGroup { location } => {
                write!(f, "empty group name for blob-server '{}'", location)
            }
        }
    }
}

impl std::error::Error for DataModelError {}

/// Identifier of a stored object: one or more of `[a-z0-9]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    pub fn parse(id: &str) -> Result<Self, DataModelError> {
        if Self::is_valid(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(DataModelError::InvalidId { id: id.to_string() })
        }
    }

    pub fn is_valid(id: &str) -> bool {
        !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    }

    /// The content address of `data`: its lowercase hex SHA-256 digest.
    pub fn from_content(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parses a requested id after dropping a trailing filename extension,
    /// e.g. `abc123.png` -> `abc123`.
    pub fn from_request(raw: &str) -> Result<Self, DataModelError> {
        Self::parse(strip_extension(raw))
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = DataModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn strip_extension(raw: &str) -> &str {
    match raw.rfind('.') {
        Some(idx) => &raw[..idx],
        None => raw,
    }
}

/// A single storage node and the group it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlobServer {
    pub group: String,
    pub location: Url,
}

impl BlobServer {
    pub fn new(group: &str, location: &str) -> Result<Self, DataModelError> {
        let location = location.trim();
        if group.trim().is_empty() {
            return Err(DataModelError::EmptyGroup {
                location: location.to_string(),
            });
        }
        let url = Url::parse(location).map_err(|e| DataModelError::InvalidLocation {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(DataModelError::InvalidLocation {
                location: location.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(DataModelError::InvalidLocation {
                location: location.to_string(),
                reason: "missing host".to_string(),
            });
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(DataModelError::InvalidLocation {
                location: location.to_string(),
                reason: "base URL cannot carry a query or fragment".to_string(),
            });
        }
        Ok(Self {
            group: group.trim().to_string(),
            location: url,
        })
    }

    pub fn base(&self) -> &str {
        self.location.as_str().trim_end_matches('/')
    }

    pub fn blob_url(&self, id: &ObjectId) -> String {
        format!("{}/blob/{}", self.base(), id)
    }

    pub fn list_url(&self) -> String {
        format!("{}/blobs", self.base())
    }
}

impl Display for BlobServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.base(), self.group)
    }
}

/// Acknowledgement body returned by a blob-server after a successful store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreResponse {
    pub id: String,
    pub status: String,
    pub size: u64,
}

impl StoreResponse {
    pub fn ok(id: &ObjectId, size: u64) -> Self {
        Self {
            id: id.to_string(),
            status: "OK".to_string(),
            size,
        }
    }
}

/// Structured error body returned by the proxy tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn upload_failed() -> Self {
        Self {
            error: "upload failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_address_of_hello() {
        let id = ObjectId::from_content(b"hello");
        assert_eq!(
            id.get(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(ObjectId::is_valid(id.get()));
    }

    #[test]
    fn test_object_id_validation() {
        assert!(ObjectId::parse("abc123").is_ok());
        for bad in ["", "ABC", "../etc/passwd", "a/b", "a.b", "a b", "test'", "ü"] {
            assert_eq!(
                ObjectId::parse(bad),
                Err(DataModelError::InvalidId {
                    id: bad.to_string()
                }),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("abc"), "abc");
        assert_eq!(strip_extension("abc.png"), "abc");
        assert_eq!(strip_extension("abc.tar.gz"), "abc.tar");
        assert_eq!(ObjectId::from_request("abc.jpg").unwrap().get(), "abc");
        assert!(ObjectId::from_request("abc.tar.gz").is_err());
    }

    #[test]
    fn test_extension_metadata_filter() {
        let metadata = extension_metadata(vec![
            ("X-Mime-Type", "image/png"),
            ("x-owner", "steve"),
            ("content-type", "text/plain"),
            ("authorization", "secret"),
            ("x", "too short"),
        ]);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get("X-Mime-Type").unwrap(), "image/png");
        assert_eq!(metadata.get("x-owner").unwrap(), "steve");
        assert_eq!(mime_type(&metadata), Some("image/png"));
    }

    #[test]
    fn test_blob_server_location() {
        let server = BlobServer::new("default", "http://localhost:3001/").unwrap();
        assert_eq!(server.base(), "http://localhost:3001");
        let id = ObjectId::parse("abc").unwrap();
        assert_eq!(server.blob_url(&id), "http://localhost:3001/blob/abc");
        assert_eq!(server.list_url(), "http://localhost:3001/blobs");

        let nested = BlobServer::new("g", "http://example.com/sos").unwrap();
        assert_eq!(nested.blob_url(&id), "http://example.com/sos/blob/abc");

        assert!(matches!(
            BlobServer::new("", "http://localhost:3001"),
            Err(DataModelError::EmptyGroup { .. })
        ));
        assert!(BlobServer::new("default", "localhost:3001").is_err());
        assert!(BlobServer::new("default", "not a url").is_err());
        assert!(BlobServer::new("default", "ftp://host").is_err());
    }

    #[test]
    fn test_store_response_wire_format() {
        let id = ObjectId::parse("abc").unwrap();
        let body = serde_json::to_string(&StoreResponse::ok(&id, 5)).unwrap();
        assert_eq!(body, r#"{"id":"abc","status":"OK","size":5}"#);
        let err = serde_json::to_string(&ApiError::upload_failed()).unwrap();
        assert_eq!(err, r#"{"error":"upload failed"}"#);
    }
}
