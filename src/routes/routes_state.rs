use std::sync::Arc;

use blob_store::BlobStore;

use crate::proxy::{DownloadProxy, UploadProxy};

/// State of a blob-server listener.
#[derive(Clone)]
pub struct NodeState {
    pub blob_store: Arc<dyn BlobStore>,
}

/// State shared by the upload and download listeners of the api-server.
#[derive(Clone)]
pub struct ProxyState {
    pub upload_proxy: UploadProxy,
    pub download_proxy: DownloadProxy,
}
