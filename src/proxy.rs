use std::{fmt, sync::Arc};

use bytes::Bytes;
use data_model::{BlobServer, Metadata, ObjectId};
use metrics::{api_io_stats, Timer};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::{
    client::{BlobServerClient, FetchedBlob},
    registry::ServerRegistry,
};

/// What the proxies share: the registry snapshot, the wire client and the
/// verbosity switch for per-candidate logging.
#[derive(Clone)]
pub struct ProxyContext {
    pub registry: Arc<ServerRegistry>,
    pub client: BlobServerClient,
    pub verbose: bool,
    pub metrics: Arc<api_io_stats::Metrics>,
}

impl ProxyContext {
    pub fn new(registry: Arc<ServerRegistry>, client: BlobServerClient, verbose: bool) -> Self {
        Self {
            registry,
            client,
            verbose,
            metrics: Arc::new(api_io_stats::Metrics::new()),
        }
    }

    fn candidate_failed(&self, server: &BlobServer, operation: &str, reason: &dyn fmt::Display) {
        self.metrics
            .candidate_failures
            .add(1, &[KeyValue::new("operation", operation.to_string())]);
        if self.verbose {
            info!(server = %server.base(), operation, error = %reason, "blob-server attempt failed");
        } else {
            debug!(server = %server.base(), operation, error = %reason, "blob-server attempt failed");
        }
    }
}

/// Every candidate was tried and none accepted the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailed {
    pub id: ObjectId,
    pub attempts: usize,
}

impl fmt::Display for UploadFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload of {} failed after {} attempts",
            self.id, self.attempts
        )
    }
}

impl std::error::Error for UploadFailed {}

#[derive(Debug, Clone)]
pub struct Uploaded {
    pub id: ObjectId,
    pub server: BlobServer,
    /// The accepting blob-server's response body, untouched.
    pub acknowledgement: Bytes,
}

/// Places new content on exactly one blob-server.
#[derive(Clone)]
pub struct UploadProxy {
    ctx: ProxyContext,
}

impl UploadProxy {
    pub fn new(ctx: ProxyContext) -> Self {
        Self { ctx }
    }

    /// Stores `data` under its SHA-256 on the first candidate that accepts it.
    pub async fn upload(&self, data: Bytes, metadata: Metadata) -> Result<Uploaded, UploadFailed> {
        let id = ObjectId::from_content(&data);
        let candidates = self.ctx.registry.ordered_servers();
        let attempts = candidates.len();

        for server in candidates {
            let result = {
                let _timer = Timer::start_with_labels(
                    &self.ctx.metrics.candidate_latency,
                    vec![KeyValue::new("operation", "upload")],
                );
                self.ctx
                    .client
                    .store(&server, &id, data.clone(), &metadata)
                    .await
            };
            match result {
                Ok(acknowledgement) => {
                    self.ctx.metrics.uploads.add(1, &[]);
                    self.ctx.metrics.upload_bytes.add(data.len() as u64, &[]);
                    if self.ctx.verbose {
                        info!(id = %id, server = %server.base(), size = data.len(), "stored upload");
                    }
                    return Ok(Uploaded {
                        id,
                        server,
                        acknowledgement,
                    });
                }
                Err(e) => self.ctx.candidate_failed(&server, "upload", &e),
            }
        }

        self.ctx.metrics.upload_failures.add(1, &[]);
        warn!(id = %id, attempts, "upload failed on every blob-server");
        Err(UploadFailed { id, attempts })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Retrieve the content.
    Content,
    /// Only establish that some blob-server holds the object.
    Exists,
}

#[derive(Debug, Clone)]
pub enum Found {
    Exists { server: BlobServer },
    Content { server: BlobServer, blob: FetchedBlob },
}

/// Serves objects from whichever blob-server answers first.
#[derive(Clone)]
pub struct DownloadProxy {
    ctx: ProxyContext,
}

impl DownloadProxy {
    pub fn new(ctx: ProxyContext) -> Self {
        Self { ctx }
    }

    /// Walks the candidate order until one blob-server has `id`. Misses on
    /// individual candidates are expected while replication catches up and
    /// are only logged.
    pub async fn download(&self, id: &ObjectId, kind: FetchKind) -> Option<Found> {
        for server in self.ctx.registry.ordered_servers() {
            if self.ctx.verbose {
                info!(url = %server.blob_url(id), "attempting retrieval");
            }
            if let Some(found) = self.try_candidate(server, id, kind).await {
                self.ctx.metrics.downloads.add(1, &[]);
                return Some(found);
            }
        }
        self.ctx.metrics.download_misses.add(1, &[]);
        None
    }

    async fn try_candidate(&self, server: BlobServer, id: &ObjectId, kind: FetchKind) -> Option<Found> {
        let _timer = Timer::start_with_labels(
            &self.ctx.metrics.candidate_latency,
            vec![KeyValue::new("operation", "download")],
        );
        match kind {
            FetchKind::Exists => match self.ctx.client.exists(&server, id).await {
                Ok(true) => Some(Found::Exists { server }),
                Ok(false) => {
                    self.ctx.candidate_failed(&server, "exists", &"not found");
                    None
                }
                Err(e) => {
                    self.ctx.candidate_failed(&server, "exists", &e);
                    None
                }
            },
            FetchKind::Content => match self.ctx.client.fetch(&server, id).await {
                Ok(blob) if blob.data.is_empty() => {
                    self.ctx.candidate_failed(&server, "fetch", &"empty body");
                    None
                }
                Ok(blob) => {
                    if self.ctx.verbose {
                        info!(id = %id, server = %server.base(), bytes = blob.data.len(), "found data");
                    }
                    Some(Found::Content { server, blob })
                }
                Err(e) => {
                    self.ctx.candidate_failed(&server, "fetch", &e);
                    None
                }
            },
        }
    }
}
