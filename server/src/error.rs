use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Generation(#[from] voice_core::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_)
            | ApiError::Generation(voice_core::Error::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Generation(voice_core::Error::ModelNotReady) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ApiError::InvalidInput(msg)
            | ApiError::NotFound(msg)
            | ApiError::Generation(voice_core::Error::InvalidRequest(msg)) => msg,
            ApiError::Generation(e @ voice_core::Error::ModelNotReady) => {
                tracing::warn!("{}", e);
                e.to_string()
            }
            ApiError::Generation(e) => {
                tracing::error!("{}", e);
                e.to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
