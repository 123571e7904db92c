use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::indexer::IndexerError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing or invalid access key")]
    Unauthorized,
    #[error("malformed request body: {0}")]
    BadRequest(String),
    #[error("indexer is shutting down")]
    ShuttingDown,
    #[error("buffer acquisition was cancelled")]
    FullQueue,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IndexerError> for IngestError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Closed => IngestError::ShuttingDown,
            IndexerError::Cancelled => IngestError::FullQueue,
            other => IngestError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "errorMessage")]
    error_message: String,
    #[serde(rename = "requestId")]
    request_id: String,
    timestamp: i64,
}

impl IngestError {
    /// Attaches the envelope's requestId/timestamp so the error body mirrors the success
    /// body shape, then renders the whole thing as a response.
    pub fn into_response_with(self, request_id: String, timestamp: i64) -> Response {
        let status = match &self {
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::FullQueue => StatusCode::TOO_MANY_REQUESTS,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error_message: self.to_string(),
            request_id,
            timestamp,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        self.into_response_with(String::new(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_maps_to_shutting_down() {
        let err: IngestError = IndexerError::Closed.into();
        assert!(matches!(err, IngestError::ShuttingDown));
    }

    #[test]
    fn cancelled_maps_to_full_queue() {
        let err: IngestError = IndexerError::Cancelled.into();
        assert!(matches!(err, IngestError::FullQueue));
    }

    #[test]
    fn response_status_codes_match_spec() {
        let response = IngestError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = IngestError::BadRequest("bad json".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = IngestError::ShuttingDown.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = IngestError::FullQueue.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = IngestError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
