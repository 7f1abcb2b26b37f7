use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lockbox_core::StorageError;
use tracing::warn;

/// A store failure on its way out as an HTTP status.
#[derive(Debug)]
pub struct ApiError(pub StorageError);

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        Self(value)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
            StorageError::Forbidden(_) => StatusCode::FORBIDDEN,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("storage failure: {}", self.0);
        }
        // Names are credential hashes; keep them out of the body.
        let body = status.canonical_reason().unwrap_or("error");
        (status, body).into_response()
    }
}
