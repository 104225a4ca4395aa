use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use data_model::ObjectId;
use tracing::debug;

use super::ProxyState;
use crate::{
    http_objects::{blob_response, close_connection, SosAPIError},
    proxy::{FetchKind, Found},
};

/// `GET /fetch/{id}`: the object from the first blob-server holding it. A
/// trailing extension on the id is ignored.
pub async fn fetch_blob(
    Path(id): Path<String>,
    State(state): State<ProxyState>,
) -> Result<Response, SosAPIError> {
    let id = ObjectId::from_request(&id)?;
    let Some(Found::Content { server, blob }) = state
        .download_proxy
        .download(&id, FetchKind::Content)
        .await
    else {
        return Ok(not_found());
    };

    debug!(id = %id, server = %server.base(), "serving object");
    Ok(blob_response(blob.data, &blob.metadata))
}

/// `HEAD /fetch/{id}`: whether any blob-server holds the object.
pub async fn probe_blob(
    Path(id): Path<String>,
    State(state): State<ProxyState>,
) -> Result<Response, SosAPIError> {
    let id = ObjectId::from_request(&id)?;
    match state.download_proxy.download(&id, FetchKind::Exists).await {
        Some(Found::Exists { server }) | Some(Found::Content { server, .. }) => {
            debug!(id = %id, server = %server.base(), "object located");
            Ok(close_connection(StatusCode::OK.into_response()))
        }
        None => Ok(not_found()),
    }
}

fn not_found() -> Response {
    close_connection(StatusCode::NOT_FOUND.into_response())
}
