//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! `VaultError`は`error_type()`と`status_code()`を提供し、
//! APIのJSONエラーレスポンスを生成する。

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// UUID parse error
    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Service-wide error type
#[derive(Debug, Error)]
pub enum VaultError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict error (duplicate resource, resource in use, job already running)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Status change not permitted by the state machine
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Password hash error
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Authorization error
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Audit chain integrity failure
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Service unavailable (e.g., archive database not configured)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::Validation(msg.into()))
    }

    /// Returns a message that is safe to show to API clients.
    ///
    /// Client-caused errors carry their detail. Server-side failures return a
    /// generic message; the full text is only written to the server log.
    pub fn external_message(&self) -> String {
        match self {
            Self::Common(CommonError::Validation(msg)) => msg.clone(),
            Self::Common(CommonError::UuidParse(_)) => "Invalid identifier".to_string(),
            Self::Common(_) => "Request error".to_string(),
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::Conflict(msg) => msg.clone(),
            Self::InvalidTransition(msg) => msg.clone(),
            Self::Database(_) => "Database error".to_string(),
            Self::PasswordHash(_) => "Authentication error".to_string(),
            Self::Jwt(_) => "Authentication error".to_string(),
            Self::Authentication(_) => "Authentication failed".to_string(),
            Self::Authorization(_) => "Access denied".to_string(),
            Self::Integrity(msg) => msg.clone(),
            Self::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Returns the error type string used in API responses.
    ///
    /// # Error Types
    ///
    /// - `invalid_request_error`: Bad request parameters
    /// - `authentication_error`: Auth failures
    /// - `permission_error`: Authorization failures
    /// - `not_found_error`: Resource not found
    /// - `conflict_error`: Duplicates and rejected state changes
    /// - `integrity_error`: Audit chain failures
    /// - `server_error`: Internal server errors
    /// - `service_unavailable`: Dependency not available
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Common(_) => "invalid_request_error",
            Self::NotFound(_) => "not_found_error",
            Self::Conflict(_) => "conflict_error",
            Self::InvalidTransition(_) => "conflict_error",
            Self::Database(_) => "server_error",
            Self::PasswordHash(_) => "authentication_error",
            Self::Jwt(_) => "authentication_error",
            Self::Authentication(_) => "authentication_error",
            Self::Authorization(_) => "permission_error",
            Self::Integrity(_) => "integrity_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Common(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PasswordHash(_) => StatusCode::UNAUTHORIZED,
            Self::Jwt(_) => StatusCode::UNAUTHORIZED,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Integrity(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Converts this error to the JSON error body.
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                message: self.external_message(),
                error_type: self.error_type().to_string(),
                code: self.status_code().as_u16().to_string(),
            },
        }
    }
}

/// APIエラーレスポンス
///
/// ```json
/// {
///   "error": {
///     "message": "Not found: case 7f1c...",
///     "type": "not_found_error",
///     "code": "404"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// The error details
    pub error: ErrorDetail,
}

/// エラー詳細
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Human-readable error message
    pub message: String,
    /// Error type (e.g., "invalid_request_error", "server_error")
    #[serde(rename = "type")]
    pub error_type: String,
    /// HTTP status as string
    pub code: String,
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (service)
pub type VaultResult<T> = Result<T, VaultError>;
