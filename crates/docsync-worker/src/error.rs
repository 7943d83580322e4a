//! Error types for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docsync_core::StorageError;
use serde::Serialize;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            WorkerError::NotFound(_) | WorkerError::Storage(StorageError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            WorkerError::BadRequest(_) | WorkerError::Storage(StorageError::InvalidArgument(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            WorkerError::Storage(StorageError::Serialization(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_DOCUMENT")
            }
            WorkerError::Storage(_) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (WorkerError::NotFound("1".into()), StatusCode::NOT_FOUND),
            (
                WorkerError::Storage(StorageError::InvalidArgument("dup".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                WorkerError::Storage(StorageError::Io("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
