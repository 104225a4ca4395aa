use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use blob_store::{BlobStorageConfig, BlobStore, LocalBlobStore};
use tokio::{self, signal, sync::watch};
use tracing::{error, info, warn};

use crate::{
    client::BlobServerClient,
    config::ServerConfig,
    proxy::{DownloadProxy, ProxyContext, UploadProxy},
    registry::ServerRegistry,
    replication::{ReplicationEngine, ReplicationReport},
    routes::{
        create_blob_server_routes,
        create_download_routes,
        create_upload_routes,
        NodeState,
        ProxyState,
        RouterOptions,
    },
};

/// Owns the resolved configuration and the shutdown plumbing shared by every
/// role the binary can run as.
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    handle: Handle,
}

impl Service {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
            handle: Handle::new(),
        }
    }

    fn router_options(&self) -> RouterOptions {
        RouterOptions {
            env: self.config.env.clone(),
            request_timeout: self.config.http.request_timeout(),
        }
    }

    fn client(&self) -> Result<BlobServerClient> {
        BlobServerClient::new(self.config.http.connect_timeout())
            .context("error initializing blob-server client")
    }

    fn watch_signals(&self) {
        let handle = self.handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down gracefully");
        });
    }

    /// Serves the storage-node surface until a shutdown signal arrives.
    pub async fn start_blob_server(&self) -> Result<()> {
        let addr = self.config.blob_server.listen_addr()?;
        let blob_store = open_blob_store(&self.config.blob_storage).await?;
        let routes = create_blob_server_routes(NodeState { blob_store }, &self.router_options());

        self.watch_signals();
        info!("blob-server listening on {}", addr);
        axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(routes.into_make_service())
            .await
            .with_context(|| format!("blob-server listener on {} failed", addr))?;
        Ok(())
    }

    /// Runs the upload and download listeners. Whichever stops with an error
    /// first takes the other one down with it.
    pub async fn start_api_server(&self, registry: Arc<ServerRegistry>, verbose: bool) -> Result<()> {
        let upload_addr = self.config.api_server.upload_addr()?;
        let download_addr = self.config.api_server.download_addr()?;

        let ctx = ProxyContext::new(registry, self.client()?, verbose);
        let state = ProxyState {
            upload_proxy: UploadProxy::new(ctx.clone()),
            download_proxy: DownloadProxy::new(ctx),
        };
        let options = self.router_options();
        let upload_routes = create_upload_routes(state.clone(), &options);
        let download_routes = create_download_routes(state, &options);

        self.watch_signals();
        info!("upload listener on {}", upload_addr);
        info!("download listener on {}", download_addr);
        let result = futures::future::try_join(
            self.spawn_listener("upload", upload_addr, upload_routes),
            self.spawn_listener("download", download_addr, download_routes),
        )
        .await;
        if result.is_err() {
            self.handle.shutdown();
        }
        result.map(|_| ())
    }

    async fn spawn_listener(&self, name: &'static str, addr: SocketAddr, routes: Router) -> Result<()> {
        let server = axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(routes.into_make_service());
        tokio::spawn(server)
            .await
            .with_context(|| format!("{} listener task failed", name))?
            .with_context(|| format!("{} listener on {} failed", name, addr))
    }

    /// A single replication pass, or one pass per `interval` until shutdown.
    pub async fn replicate(
        &self,
        registry: Arc<ServerRegistry>,
        verbose: bool,
        interval: Option<Duration>,
    ) -> Result<Option<ReplicationReport>> {
        let engine = ReplicationEngine::new(registry, self.client()?, verbose);
        match interval {
            None => Ok(Some(engine.run_pass().await)),
            Some(interval) => {
                self.watch_signals();
                info!("replicating every {:?}", interval);
                engine
                    .run_periodically(interval, self.shutdown_rx.clone())
                    .await?;
                Ok(None)
            }
        }
    }
}

/// Logs every registered blob-server and renders the registry as YAML.
pub fn dump_registry(registry: &ServerRegistry) -> Result<String> {
    for server in registry.servers() {
        info!(group = %server.group, location = %server.base(), "registered blob-server");
    }
    serde_yaml::to_string(registry).context("error serializing registry")
}

/// Opens the node's store. A filesystem store is confined to its directory
/// when the process is allowed to `chroot`.
async fn open_blob_store(config: &BlobStorageConfig) -> Result<Arc<dyn BlobStore>> {
    let Some(dir) = config.local_dir()? else {
        return Ok(config.build().await?);
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("error creating blob directory {}", dir.display()))?;
    let root = if confine(&dir) {
        PathBuf::from("/")
    } else {
        dir
    };
    let store = LocalBlobStore::open(root)
        .await
        .context("error initializing blob store")?;
    Ok(Arc::new(store))
}

#[cfg(unix)]
fn confine(dir: &Path) -> bool {
    match std::os::unix::fs::chroot(dir).and_then(|_| std::env::set_current_dir("/")) {
        Ok(()) => {
            info!(dir = %dir.display(), "confined to blob directory");
            true
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "chroot unavailable, serving without confinement");
            false
        }
    }
}

#[cfg(not(unix))]
fn confine(dir: &Path) -> bool {
    warn!(dir = %dir.display(), "chroot unsupported, serving without confinement");
    false
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down gracefully");
}
