use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Per-field reasons, reported as `{"errors": {field: reason}}`
    #[error("Invalid parameters: {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    InvalidFields(BTreeMap<String, String>),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct FieldErrors<'a> {
    errors: &'a BTreeMap<String, String>,
}

impl ApiError {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidFields(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidFields(_) => "InvalidFields",
            ApiError::InternalError(_) => "InternalServerError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::InvalidFields(errors) => {
                tracing::info!(error = %self, "rejected control request");
                (status, Json(FieldErrors { errors })).into_response()
            }
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                let body = ErrorResponse {
                    error: self.error_type().to_string(),
                    message: "An internal error occurred".to_string(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{error:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::InvalidFields(BTreeMap::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_display_lists_fields() {
        let mut errors = BTreeMap::new();
        errors.insert(
            "min_load".to_string(),
            "invalid value, must be an integer".to_string(),
        );
        errors.insert("foo".to_string(), "invalid key".to_string());
        let error = ApiError::InvalidFields(errors);
        assert_eq!(error.to_string(), "Invalid parameters: foo, min_load");
        assert_eq!(error.error_type(), "InvalidFields");
    }
}
