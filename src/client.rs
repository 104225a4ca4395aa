use std::{fmt, time::Duration};

use anyhow::Result;
use axum::http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};
use bytes::Bytes;
use data_model::{extension_metadata, BlobServer, Metadata, ObjectId};
use reqwest::Client;
use tracing::warn;

/// Why a single blob-server call did not succeed.
#[derive(Debug)]
pub enum ClientError {
    /// The server could not be reached or the exchange broke off.
    Transport { url: String, source: reqwest::Error },
    /// The server answered with a non-success status.
    Status { url: String, status: StatusCode },
    /// The server answered but the body was not what the protocol expects.
    Decode { url: String, reason: String },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport { url, source } => write!(f, "{}: {}", url, source),
            ClientError::Status { url, status } => write!(f, "{}: status {}", url, status),
            ClientError::Decode { url, reason } => write!(f, "{}: {}", url, reason),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// An object read back from a blob-server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlob {
    pub data: Bytes,
    pub metadata: Metadata,
}

/// Speaks the blob-server wire protocol. Shared by the proxies and the
/// replicator.
#[derive(Clone)]
pub struct BlobServerClient {
    client: Client,
}

impl BlobServerClient {
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Writes an object and returns the server's raw acknowledgement.
    pub async fn store(
        &self,
        server: &BlobServer,
        id: &ObjectId,
        data: Bytes,
        metadata: &Metadata,
    ) -> Result<Bytes, ClientError> {
        let url = server.blob_url(id);
        let response = self
            .client
            .post(&url)
            .headers(metadata_headers(metadata))
            .body(data)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }
        response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport { url, source })
    }

    /// Reads an object together with its extension headers.
    pub async fn fetch(
        &self,
        server: &BlobServer,
        id: &ObjectId,
    ) -> Result<FetchedBlob, ClientError> {
        let url = server.blob_url(id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status { url, status });
        }
        let metadata = header_metadata(response.headers());
        let data = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport { url, source })?;
        Ok(FetchedBlob { data, metadata })
    }

    /// Probes for an object with a HEAD request.
    pub async fn exists(&self, server: &BlobServer, id: &ObjectId) -> Result<bool, ClientError> {
        let url = server.blob_url(id);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ClientError::Status { url, status }),
        }
    }

    /// Lists every id the server holds.
    pub async fn list(&self, server: &BlobServer) -> Result<Vec<ObjectId>, ClientError> {
        let url = server.list_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }
        let raw: Vec<String> = response.json().await.map_err(|e| ClientError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(raw
            .into_iter()
            .filter_map(|id| match ObjectId::parse(&id) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(url = %url, id = %id, "ignoring invalid id in listing");
                    None
                }
            })
            .collect())
    }
}

/// Extension entries of `headers`; the first value of a repeated header wins.
pub fn header_metadata(headers: &HeaderMap) -> Metadata {
    extension_metadata(headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|value| (name.as_str(), value.to_string()))
    }))
}

/// Converts metadata back into request or response headers. Entries that are
/// not valid HTTP header names or values are dropped.
pub fn metadata_headers(metadata: &Metadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in metadata {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(key = %key, "dropping metadata entry that is not a valid header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_metadata_keeps_extension_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mime-type", HeaderValue::from_static("image/png"));
        headers.append("x-owner", HeaderValue::from_static("steve"));
        headers.append("x-owner", HeaderValue::from_static("bob"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("host", HeaderValue::from_static("localhost"));

        let metadata = header_metadata(&headers);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["x-mime-type"], "image/png");
        assert_eq!(metadata["x-owner"], "steve");
    }

    #[test]
    fn test_metadata_headers_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("x-filename".to_string(), "cat.png".to_string());
        metadata.insert("x-bad".to_string(), "line\nbreak".to_string());

        let headers = metadata_headers(&metadata);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-filename"], "cat.png");

        let back = header_metadata(&headers);
        assert_eq!(back.get("x-filename").map(String::as_str), Some("cat.png"));
    }
}
