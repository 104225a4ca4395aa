use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware::ServiceRequestSpan;

mod blob;
mod download;
pub mod routes_state;
mod upload;

pub use blob::{alive, get_blob, head_blob, list_blobs, put_blob};
pub use download::{fetch_blob, probe_blob};
pub use routes_state::{NodeState, ProxyState};
pub use upload::upload;

/// Options applied to every listener.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub env: String,
    pub request_timeout: Duration,
}

/// The storage-node surface.
pub fn create_blob_server_routes(state: NodeState, options: &RouterOptions) -> Router {
    Router::new()
        .route("/alive", get(alive).fallback(blob_server_missing))
        .route(
            "/blob/{id}",
            get(get_blob)
                .head(head_blob)
                .post(put_blob)
                .fallback(blob_server_missing),
        )
        .route("/blobs", get(list_blobs).fallback(blob_server_missing))
        .fallback(blob_server_missing)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(TraceLayer::new_for_http().make_span_with(ServiceRequestSpan::new(
            &options.env,
            "blob-server",
        )))
}

/// The api-server upload surface.
pub fn create_upload_routes(state: ProxyState, options: &RouterOptions) -> Router {
    Router::new()
        .route("/upload", post(upload).fallback(api_missing))
        .fallback(api_missing)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(
            TraceLayer::new_for_http().make_span_with(ServiceRequestSpan::new(&options.env, "upload")),
        )
}

/// The api-server download surface.
pub fn create_download_routes(state: ProxyState, options: &RouterOptions) -> Router {
    Router::new()
        .route(
            "/fetch/{id}",
            get(fetch_blob).head(probe_blob).fallback(api_missing),
        )
        .fallback(api_missing)
        .with_state(state)
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(ServiceRequestSpan::new(&options.env, "download")),
        )
}

async fn blob_server_missing() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 - content is not hosted here.")
}

async fn api_missing() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Invalid method or location.")
}
