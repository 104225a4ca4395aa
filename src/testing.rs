use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::Router;
use blob_store::{BlobError, BlobResult, BlobStore, MemoryBlobStore, StoredBlob};
use bytes::Bytes;
use data_model::{Metadata, ObjectId};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, subscriber};
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    client::BlobServerClient,
    proxy::{DownloadProxy, ProxyContext, UploadProxy},
    registry::ServerRegistry,
    routes::{
        create_blob_server_routes,
        create_download_routes,
        create_upload_routes,
        NodeState,
        ProxyState,
        RouterOptions,
    },
};

/// Nothing listens here; connections are refused immediately.
pub const DEAD_LOCATION: &str = "http://127.0.0.1:1";

pub fn init_test_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
    );
}

pub fn test_options() -> RouterOptions {
    RouterOptions {
        env: "test".to_string(),
        request_timeout: Duration::from_secs(5),
    }
}

pub fn test_client() -> BlobServerClient {
    BlobServerClient::new(Some(Duration::from_secs(1))).unwrap()
}

async fn serve(router: Router) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("test listener on {} failed: {:?}", addr, e);
        }
    });
    Ok((addr, task))
}

/// A blob-server on an ephemeral port. Stops when dropped.
pub struct TestBlobServer {
    pub addr: SocketAddr,
    pub store: Arc<dyn BlobStore>,
    task: JoinHandle<()>,
}

impl TestBlobServer {
    pub async fn start(store: Arc<dyn BlobStore>) -> Result<Self> {
        init_test_tracing();
        let routes = create_blob_server_routes(
            NodeState {
                blob_store: store.clone(),
            },
            &test_options(),
        );
        let (addr, task) = serve(routes).await?;
        Ok(Self { addr, store, task })
    }

    pub async fn memory() -> Result<Self> {
        Self::start(Arc::new(MemoryBlobStore::new())).await
    }

    /// A node preloaded with `contents`; returns the ids in input order.
    pub async fn with_objects(contents: &[&str]) -> Result<(Self, Vec<ObjectId>)> {
        let server = Self::memory().await?;
        let mut ids = Vec::with_capacity(contents.len());
        for content in contents {
            ids.push(server.put(content, Metadata::new()).await?);
        }
        Ok((server, ids))
    }

    pub fn location(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.location(), path)
    }

    /// Stores `content` straight into the backing store under its digest.
    pub async fn put(&self, content: &str, metadata: Metadata) -> Result<ObjectId> {
        let id = ObjectId::from_content(content.as_bytes());
        self.store
            .store(&id, Bytes::copy_from_slice(content.as_bytes()), metadata)
            .await?;
        Ok(id)
    }

    pub async fn ids(&self) -> Result<Vec<ObjectId>> {
        Ok(self.store.existing().await?)
    }
}

impl Drop for TestBlobServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serves reads normally but refuses every write, like a node with a full
/// disk.
#[derive(Default)]
pub struct ReadOnlyStore {
    inner: MemoryBlobStore,
}

#[async_trait]
impl BlobStore for ReadOnlyStore {
    async fn exists(&self, id: &ObjectId) -> BlobResult<bool> {
        self.inner.exists(id).await
    }

    async fn get(&self, id: &ObjectId) -> BlobResult<Option<StoredBlob>> {
        self.inner.get(id).await
    }

    async fn store(&self, _id: &ObjectId, _data: Bytes, _metadata: Metadata) -> BlobResult<()> {
        Err(BlobError::Other {
            source: anyhow!("disk full"),
        })
    }

    async fn existing(&self) -> BlobResult<Vec<ObjectId>> {
        self.inner.existing().await
    }
}

/// Upload and download listeners of an api-server over `registry`.
pub struct TestApiServer {
    pub upload_addr: SocketAddr,
    pub download_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl TestApiServer {
    pub async fn start(registry: ServerRegistry) -> Result<Self> {
        init_test_tracing();
        let ctx = ProxyContext::new(Arc::new(registry), test_client(), true);
        let state = ProxyState {
            upload_proxy: UploadProxy::new(ctx.clone()),
            download_proxy: DownloadProxy::new(ctx),
        };
        let options = test_options();
        let (upload_addr, upload_task) = serve(create_upload_routes(state.clone(), &options)).await?;
        let (download_addr, download_task) = serve(create_download_routes(state, &options)).await?;
        Ok(Self {
            upload_addr,
            download_addr,
            tasks: vec![upload_task, download_task],
        })
    }

    pub fn upload_url(&self) -> String {
        format!("http://{}/upload", self.upload_addr)
    }

    pub fn fetch_url(&self, id: &str) -> String {
        format!("http://{}/fetch/{}", self.download_addr, id)
    }
}

impl Drop for TestApiServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// A registry with every location in `group`.
pub fn registry_of(group: &str, locations: &[String]) -> ServerRegistry {
    let mut registry = ServerRegistry::new();
    for location in locations {
        registry.add_server(group, location).unwrap();
    }
    registry
}
