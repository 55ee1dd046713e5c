//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kameo::error::SendError;
use labfleet_core::{CoreError, ErrorClass};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
}

/// Wrapper for API errors with status codes
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ApiError,
}

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            error: ApiError {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
    }
}

fn status_for(class: ErrorClass) -> (StatusCode, &'static str) {
    match class {
        ErrorClass::InvalidInput => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        ErrorClass::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorClass::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
        ErrorClass::Transport => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        ErrorClass::Timeout => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        ErrorClass::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let (status, code) = status_for(err.status_class());
        if status.is_server_error() {
            tracing::warn!(error = %err, "request failed");
        }
        Self::new(status, code, err.to_string())
    }
}

impl<M> From<SendError<M, CoreError>> for AppError {
    fn from(err: SendError<M, CoreError>) -> Self {
        match err {
            SendError::HandlerError(e) => e.into(),
            other => Self::internal(format!("orchestrator unavailable: {other}")),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_statuses() {
        let cases = [
            (CoreError::NotFound("dut x".into()), StatusCode::NOT_FOUND),
            (CoreError::ConfigError("bad".into()), StatusCode::BAD_REQUEST),
            (CoreError::Reserved("port 1".into()), StatusCode::CONFLICT),
            (CoreError::Conflict("busy".into()), StatusCode::CONFLICT),
            (CoreError::Transport("down".into()), StatusCode::BAD_GATEWAY),
            (CoreError::Timeout("slow".into()), StatusCode::GATEWAY_TIMEOUT),
            (CoreError::ActorError("gone".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
