//! Error response formatting
//!
//! Standardized JSON error responses with HTTP status codes, machine
//! error codes and a retryability hint, shared by every handler.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    pub fn validation_error(request_id: Option<String>, field: &str, message: &str) -> Self {
        Self {
            error: ErrorCode::ValidationError,
            message: format!("Validation failed for field '{}'", field),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            retryable: Some(false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Attach the request id to an error and render it
pub fn app_error_response(
    err: AppError,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let err = match request_id {
        Some(req_id) => err.with_request_id(req_id),
        None => err,
    };
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from_app_error(&err)))
}

/// Build a standardized JSON error response for handlers that only have a
/// StatusCode + message
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let message = message.into();
    let error_response = match status.as_u16() {
        400..=499 => ErrorResponse::validation_error(request_id, "request", &message)
            .with_details(serde_json::json!({ "message": message })),
        _ => ErrorResponse::internal_error(request_id),
    };

    (status, Json(error_response))
}
