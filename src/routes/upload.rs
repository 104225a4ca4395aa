use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::debug;

use super::ProxyState;
use crate::{client::header_metadata, http_objects::upload_failed_response};

/// `POST /upload`: content-addressed placement on one blob-server. The
/// accepting server's acknowledgement is returned as-is.
pub async fn upload(State(state): State<ProxyState>, headers: HeaderMap, body: Bytes) -> Response {
    let metadata = header_metadata(&headers);
    match state.upload_proxy.upload(body, metadata).await {
        Ok(uploaded) => {
            debug!(id = %uploaded.id, server = %uploaded.server.base(), "upload placed");
            (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                uploaded.acknowledgement,
            )
                .into_response()
        }
        Err(e) => {
            debug!(error = %e, "rejecting upload");
            upload_failed_response()
        }
    }
}
