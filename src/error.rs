//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Startup-time configuration failures. Never sent to a client: assembly aborts before serving.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid custom router in {source_name}: {reason}")]
    InvalidRouter { source_name: String, reason: String },
    #[error("invalid interceptor for {model}.{slot}: {reason}")]
    InvalidInterceptor {
        model: String,
        slot: String,
        reason: String,
    },
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("unknown endpoint '{endpoint}' in {context}")]
    UnknownEndpoint { endpoint: String, context: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// One field-level failure reported by body validation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    MissingRequestQueryParameters(String),
    #[error("{0}")]
    InvalidFilterMode(String),
    #[error("{0}")]
    MissingArrayRequestBody(String),
    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<FieldError>),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NoRecordsAffected(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ValidationFailed(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MissingRequestQueryParameters(_)
            | AppError::InvalidFilterMode(_)
            | AppError::MissingArrayRequestBody(_)
            | AppError::ValidationFailed(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::NoRecordsAffected(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::MissingRequestQueryParameters(_) => "missing_request_query_parameters",
            AppError::InvalidFilterMode(_) => "invalid_filter_mode",
            AppError::MissingArrayRequestBody(_) => "missing_array_request_body",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::NotFound(_) => "not_found",
            AppError::NoRecordsAffected(_) => "no_records_affected",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Db(_) => "database_error",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            AppError::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_safety_errors_are_bad_requests() {
        assert_eq!(
            AppError::MissingRequestQueryParameters("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::InvalidFilterMode("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NoRecordsAffected("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = AppError::ValidationFailed(vec![
            FieldError { field: "name".into(), message: "is required".into() },
            FieldError { field: "email".into(), message: "must be a valid email".into() },
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: name: is required; email: must be a valid email"
        );
    }
}
