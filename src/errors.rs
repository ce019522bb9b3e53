use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad or missing input. Raised before any external call or persist.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A state-machine guard failed, or a concurrent transition won the CAS.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Payment-processor gateway failure. `retryable` distinguishes
    /// network/timeout/5xx from a rejection by the processor itself.
    #[error("Processor error: {message}")]
    Processor { message: String, retryable: bool },

    /// Local store write failed. When this happens after a successful
    /// processor write the external state is ahead of ours; the next sync
    /// reconciles it.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn processor_retryable(message: impl Into<String>) -> Self {
        AppError::Processor { message: message.into(), retryable: true }
    }

    pub fn processor_rejected(message: impl Into<String>) -> Self {
        AppError::Processor { message: message.into(), retryable: false }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Precondition(_) => "precondition_failed",
            AppError::Processor { .. } => "processor_error",
            AppError::Persistence(_) => "persistence_error",
            AppError::Auth(_) => "authentication_error",
            AppError::Config(_) => "configuration_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Precondition(_) => StatusCode::CONFLICT,
            AppError::Processor { retryable: true, .. } => StatusCode::BAD_GATEWAY,
            AppError::Processor { retryable: false, .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Processor { retryable: true, .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            other => AppError::Persistence(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", err))
    }
}

/// Strips anything shaped like a government-ID number from an outgoing
/// message. Processor error bodies can echo submitted identity fields.
pub fn redact_sensitive(message: &str) -> String {
    match Regex::new(r"\b\d{3}-?\d{2}-?\d{4}\b|\b\d{9}\b") {
        Ok(re) => re.replace_all(message, "[redacted]").into_owned(),
        Err(_) => message.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": redact_sensitive(&self.to_string()),
            "retryable": self.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_ssn_shaped_runs() {
        let msg = "owner ssn 123-45-6789 was rejected (raw 987654321)";
        let out = redact_sensitive(msg);
        assert!(!out.contains("123-45-6789"));
        assert!(!out.contains("987654321"));
        assert_eq!(out.matches("[redacted]").count(), 2);
    }

    #[test]
    fn keeps_short_numbers() {
        assert_eq!(redact_sensitive("page 2 of 14"), "page 2 of 14");
    }

    #[test]
    fn retryable_maps_to_bad_gateway() {
        let err = AppError::processor_retryable("timeout");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_retryable());
        let err = AppError::processor_rejected("account rejected");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!err.is_retryable());
    }
}
