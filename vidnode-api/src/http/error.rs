// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<vidnode_core::Error> for AppError {
    fn from(err: vidnode_core::Error) -> Self {
        use vidnode_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Authentication(msg) => Self::unauthorized(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Manifest(msg) => {
                tracing::warn!("Manifest error: {}", msg);
                Self::conflict(msg)
            }
            Error::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                Self::new(StatusCode::BAD_GATEWAY, "Upstream service unavailable")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                Self::internal("Storage error")
            }
            Error::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                Self::internal("Database error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<vidnode_cluster::Error> for AppError {
    fn from(err: vidnode_cluster::Error) -> Self {
        use vidnode_cluster::Error;

        match err {
            Error::LinkClosed(msg) | Error::Timeout(msg) => {
                tracing::error!("Coordinator unavailable: {}", msg);
                Self::service_unavailable("Coordinator unavailable")
            }
            other => {
                tracing::error!("Database job failed: {}", other);
                Self::internal("Database error")
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::bad_request(format!("Invalid multipart body: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal("Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_status() {
        let cases = [
            (vidnode_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (vidnode_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (vidnode_core::Error::Authentication("x".into()), StatusCode::UNAUTHORIZED),
            (vidnode_core::Error::Manifest("x".into()), StatusCode::CONFLICT),
            (vidnode_core::Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_closed_link_is_unavailable() {
        let err = AppError::from(vidnode_cluster::Error::LinkClosed("gone".into()));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
