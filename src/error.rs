/// Unified error types for the CineShelf notification service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("{0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate review)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

/// JSON error body returned to HTTP callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Convert NotifyError to HTTP response
impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            NotifyError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            NotifyError::Authorization(_) => (StatusCode::FORBIDDEN, self.to_string()),
            NotifyError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            NotifyError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            NotifyError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            NotifyError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
            _ => {
                // Don't leak details
                tracing::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let mut response = (status, Json(ErrorResponse { error: message })).into_response();

        if let NotifyError::RateLimitExceeded { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

/// Result type alias for service operations
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Shorthand for the "Missing required field" validation error
pub fn missing_field(name: &str) -> NotifyError {
    NotifyError::Validation(format!("Missing required field: {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (NotifyError::Authentication("Unauthorized".into()), StatusCode::UNAUTHORIZED),
            (NotifyError::Authorization("nope".into()), StatusCode::FORBIDDEN),
            (missing_field("token"), StatusCode::BAD_REQUEST),
            (NotifyError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (NotifyError::Conflict("x".into()), StatusCode::CONFLICT),
            (NotifyError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                NotifyError::RateLimitExceeded {
                    retry_after: std::time::Duration::from_secs(1),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_validation_message_is_bare() {
        assert_eq!(missing_field("token").to_string(), "Missing required field: token");
    }
}
