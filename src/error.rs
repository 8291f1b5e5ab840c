use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A KVS (Redis) error.
    #[error("KVS error: {0}")]
    Kvs(#[from] redis::RedisError),

    /// A KVS operation exceeded its bounded timeout.
    #[error("KVS operation timed out after {0}ms")]
    KvsTimeout(u64),

    /// The KVS backend reported itself unavailable.
    #[error("KVS unavailable: {0}")]
    KvsUnavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        limit: u64,
        retry_after_secs: u64,
        reset_epoch_secs: i64,
    },

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether this error means the KVS could not be reached in time.
    ///
    /// Callers use this to pick the degraded path (fail open, treat as
    /// miss) instead of surfacing the failure.
    pub fn is_kvs_failure(&self) -> bool {
        matches!(
            self,
            AppError::Kvs(_) | AppError::KvsTimeout(_) | AppError::KvsUnavailable(_)
        )
    }
}

/// The JSON body sent with a `429 Too Many Requests` response.
#[derive(Serialize)]
struct RateLimitBody {
    success: bool,
    message: String,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

fn json_body(message: &str) -> String {
    sonic_rs::to_string(&sonic_rs::json!({
        "success": false,
        "message": message
    }))
    .unwrap_or_else(|_| r#"{"success":false,"message":"Internal server error"}"#.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::RateLimited {
                message,
                limit,
                retry_after_secs,
                reset_epoch_secs,
            } => {
                tracing::warn!("Rate limit exceeded: {}", message);

                let body = sonic_rs::to_string(&RateLimitBody {
                    success: false,
                    message,
                    retry_after: retry_after_secs,
                })
                .unwrap_or_else(|_| {
                    r#"{"success":false,"message":"Too many requests"}"#.to_string()
                });

                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response();

                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", limit.into());
                headers.insert("x-ratelimit-remaining", 0u64.into());
                headers.insert("x-ratelimit-reset", reset_epoch_secs.into());

                return response;
            }
            AppError::Kvs(ref e) => {
                tracing::error!("KVS error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::KvsTimeout(ms) => {
                tracing::error!("KVS operation timed out after {}ms", ms);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::KvsUnavailable(ref msg) => {
                tracing::error!("KVS unavailable: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            json_body(&message),
        )
            .into_response()
    }
}
