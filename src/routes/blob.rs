use anyhow::anyhow;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use data_model::{ObjectId, StoreResponse};
use tracing::{debug, error};

use super::NodeState;
use crate::{
    client::header_metadata,
    http_objects::{blob_response, close_connection, SosAPIError},
};

/// Liveness probe.
pub async fn alive() -> &'static str {
    "alive"
}

/// `GET /blob/{id}`: the object with its metadata as response headers.
pub async fn get_blob(
    Path(id): Path<String>,
    State(state): State<NodeState>,
) -> Result<Response, SosAPIError> {
    let id = ObjectId::parse(&id)?;
    let blob = state
        .blob_store
        .get(&id)
        .await
        .map_err(|e| SosAPIError::internal_error(anyhow!("failed to read {}: {}", id, e)))?;
    let Some(blob) = blob else {
        return Ok((StatusCode::NOT_FOUND, "404 page not found").into_response());
    };

    Ok(blob_response(blob.data, &blob.metadata))
}

/// `HEAD /blob/{id}`: existence only.
pub async fn head_blob(
    Path(id): Path<String>,
    State(state): State<NodeState>,
) -> Result<Response, SosAPIError> {
    let id = ObjectId::parse(&id)?;
    let exists = state
        .blob_store
        .exists(&id)
        .await
        .map_err(|e| SosAPIError::internal_error(anyhow!("failed to probe {}: {}", id, e)))?;
    let status = if exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok(close_connection(status.into_response()))
}

/// `POST /blob/{id}`: stores the request body and its extension headers.
pub async fn put_blob(
    Path(id): Path<String>,
    State(state): State<NodeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoreResponse>, SosAPIError> {
    let id = ObjectId::parse(&id)?;
    let metadata = header_metadata(&headers);
    let size = body.len() as u64;
    if let Err(e) = state.blob_store.store(&id, body, metadata).await {
        error!(id = %id, error = %e, "failed to write to storage");
        return Err(SosAPIError::internal_error_str("failed to write to storage"));
    }
    debug!(id = %id, size, "stored blob");
    Ok(Json(StoreResponse::ok(&id, size)))
}

/// `GET /blobs`: every id this node holds.
pub async fn list_blobs(State(state): State<NodeState>) -> Result<Json<Vec<String>>, SosAPIError> {
    let ids = state
        .blob_store
        .existing()
        .await
        .map_err(|e| SosAPIError::internal_error(anyhow!("failed to list blobs: {}", e)))?;
    Ok(Json(ids.into_iter().map(String::from).collect()))
}
