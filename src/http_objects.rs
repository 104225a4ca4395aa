use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use data_model::{mime_type, ApiError, DataModelError, Metadata};
use tracing::{error, warn};

use crate::client::metadata_headers;

/// Error returned by HTTP handlers. Rendered as a plain-text body with the
/// given status, matching what blob-server clients expect.
#[derive(Debug)]
pub struct SosAPIError {
    status_code: StatusCode,
    message: String,
}

impl SosAPIError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string().as_str())
    }

    pub fn internal_error_str(e: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for SosAPIError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.message);
        } else {
            warn!("API Error: {} - {}", self.status_code, self.message);
        }
        (self.status_code, self.message).into_response()
    }
}

/// Invalid object ids are reported as server errors, never silently dropped.
impl From<DataModelError> for SosAPIError {
    fn from(e: DataModelError) -> Self {
        Self::internal_error_str(&e.to_string())
    }
}

/// The structured failure body of the upload service.
pub fn upload_failed_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::upload_failed()),
    )
        .into_response()
}

/// Content delivered to a client: extension metadata becomes response
/// headers and `X-Mime-Type` also sets the content type.
pub fn blob_response(data: Bytes, metadata: &Metadata) -> Response {
    let mut headers = metadata_headers(metadata);
    if let Some(content_type) = mime_type(metadata) {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    let mut response = Response::new(Body::from(data));
    response.headers_mut().extend(headers);
    response
}

/// Marks a response so the client does not reuse the connection.
pub fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
