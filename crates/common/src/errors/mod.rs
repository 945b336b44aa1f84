//! Error types for AstroRAG services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for caller, backend and internal failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Caller input errors (1xxx)
    ValidationError,
    MissingField,
    InvalidMode,

    // Answer contract errors (4xxx)
    CitationsRequired,

    // Backend errors (8xxx)
    StoreUnavailable,
    ProviderUnavailable,
    ProviderTimeout,
    UpstreamError,
    CacheError,

    // Exhaustion (85xx)
    RetrievalExhausted,
    GenerationExhausted,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    SchemaRepairError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidMode => 1003,

            ErrorCode::CitationsRequired => 4221,

            ErrorCode::StoreUnavailable => 8001,
            ErrorCode::ProviderUnavailable => 8002,
            ErrorCode::ProviderTimeout => 8003,
            ErrorCode::UpstreamError => 8004,
            ErrorCode::CacheError => 8005,

            ErrorCode::RetrievalExhausted => 8501,
            ErrorCode::GenerationExhausted => 8502,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::SchemaRepairError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Caller input errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Unsupported mode: {mode}")]
    InvalidMode { mode: String },

    #[error("Citations required")]
    CitationsRequired,

    // Backend errors
    #[error("Store '{store}' unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Exhaustion of every fallback
    #[error("Retrieval exhausted: {message}")]
    RetrievalExhausted { message: String },

    #[error("Generation exhausted: {message}")]
    GenerationExhausted { message: String },

    // Internal errors
    #[error("Schema repair failed: {message}")]
    SchemaRepair { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidMode { .. } => ErrorCode::InvalidMode,
            AppError::CitationsRequired => ErrorCode::CitationsRequired,
            AppError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            AppError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            AppError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::RetrievalExhausted { .. } => ErrorCode::RetrievalExhausted,
            AppError::GenerationExhausted { .. } => ErrorCode::GenerationExhausted,
            AppError::SchemaRepair { .. } => ErrorCode::SchemaRepairError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidMode { .. } => StatusCode::BAD_REQUEST,

            // 422 Unprocessable Entity
            AppError::CitationsRequired => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::SchemaRepair { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::ProviderUnavailable { .. }
            | AppError::ProviderTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::StoreUnavailable { .. }
            | AppError::CacheError { .. }
            | AppError::RetrievalExhausted { .. }
            | AppError::GenerationExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Caller input problems are surfaced immediately and never retried
    pub fn is_caller_input(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::MissingField { .. } | AppError::InvalidMode { .. }
        )
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation { field: Some(field), .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_input_maps_to_4xx() {
        let err = AppError::InvalidMode { mode: "horary".into() };
        assert_eq!(err.code(), ErrorCode::InvalidMode);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_caller_input());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_citations_required_is_unprocessable() {
        let err = AppError::CitationsRequired;
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code().as_code(), 4221);
        assert!(!err.is_caller_input());
    }

    #[test]
    fn test_exhaustion_is_server_error() {
        let err = AppError::GenerationExhausted {
            message: "all tiers failed".into(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_provider_errors_are_bad_gateway() {
        let err = AppError::ProviderTimeout {
            provider: "primary_openai".into(),
            timeout_ms: 1200,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), ErrorCode::ProviderTimeout);
    }
}
