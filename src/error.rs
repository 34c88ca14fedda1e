// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors raised while obtaining or refreshing the service access token
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Missing or unusable client credentials / refresh token
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization server rejected the refresh grant
    #[error("Token request failed: {status} - {message}")]
    TokenRequestFailed {
        status: u16,
        code: String,
        message: String,
    },

    /// Token endpoint did not answer within the request timeout
    #[error("Token request timed out")]
    Timeout,

    /// Token endpoint could not be reached
    #[error("Token request transport error: {0}")]
    Transport(String),

    /// Successful status but unusable body
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

impl AuthError {
    /// Whether the authorization server rejected the token itself (4xx),
    /// as opposed to being unavailable or answering with garbage.
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, AuthError::TokenRequestFailed { status, .. } if (400..500).contains(status))
    }
}

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Refresh grant rejected by the authorization server
    #[error("Token request failed: {status} - {message}")]
    TokenRequestFailed {
        status: u16,
        code: String,
        message: String,
    },

    /// Banking API rejected the request even after a forced token refresh
    #[error("Unauthorized: banking API answered {status} after token refresh")]
    Unauthorized { status: u16 },

    /// Any other non-2xx answer from the banking API
    #[error("Upstream error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    /// Request exceeded its time budget
    #[error("Upstream request timed out")]
    Timeout,

    /// Connection-level failure talking to an upstream
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Config(msg) => ApiError::ConfigError(msg),
            AuthError::TokenRequestFailed {
                status,
                code,
                message,
            } => ApiError::TokenRequestFailed {
                status,
                code,
                message,
            },
            AuthError::Timeout => ApiError::Timeout,
            AuthError::Transport(msg) => ApiError::Transport(msg),
            AuthError::MalformedResponse(msg) => {
                ApiError::Internal(anyhow::anyhow!("Malformed token response: {}", msg))
            }
        }
    }
}

impl ApiError {
    /// HTTP status surfaced to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ConfigError(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TokenRequestFailed { status, .. } | ApiError::UpstreamError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Unauthorized { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Transport(_) => StatusCode::BAD_GATEWAY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &str {
        match self {
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::TokenRequestFailed { code, .. } => code,
            ApiError::Unauthorized { .. } => "UNAUTHORIZED",
            ApiError::UpstreamError { .. } => "UPSTREAM_ERROR",
            ApiError::Timeout => "TIMEOUT",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code().to_string();

        let message = match &self {
            ApiError::ConfigError(msg) | ApiError::ValidationError(msg) => msg.clone(),
            ApiError::TokenRequestFailed { message, .. } => {
                format!("Could not obtain access token: {}", message)
            }
            ApiError::Unauthorized { status } => {
                format!("Access denied by banking API ({})", status)
            }
            ApiError::UpstreamError { message, .. } => message.clone(),
            ApiError::Timeout => "Banking API did not respond in time".to_string(),
            ApiError::Transport(_) => "Banking API is unreachable".to_string(),
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": true,
            "message": crate::sanitize::sanitize_text(&message),
            "code": code,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
