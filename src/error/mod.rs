// Error types for gencache
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Jail update failed: {0}")]
    JailUpdate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream rate limited: {0}")]
    TooManyRequests(String),

    #[error("Upstream unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Short label used for the error metric and event history.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::KeyDerivation(_) => "key_derivation",
            CacheError::StoreRead(_) => "store_read",
            CacheError::StoreWrite(_) => "store_write",
            CacheError::JailUpdate(_) => "jail_update",
            CacheError::Config(_) | CacheError::ConfigParsing(_) => "config",
            CacheError::Upstream(_)
            | CacheError::TooManyRequests(_)
            | CacheError::ServiceUnavailable(_)
            | CacheError::Http(_) => "upstream",
            CacheError::InvalidRequest(_) => "invalid_request",
            CacheError::Redis(_) => "redis",
            CacheError::Json(_) => "json",
            CacheError::Io(_) => "io",
            CacheError::Metrics(_) => "metrics",
            CacheError::Internal(_) => "internal",
        }
    }
}

// Convert CacheError to HTTP responses for Axum
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            CacheError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            CacheError::TooManyRequests(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            CacheError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "overloaded_error")
            }
            CacheError::Upstream(_) | CacheError::Http(_) => (StatusCode::BAD_GATEWAY, "api_error"),
            CacheError::Config(_) | CacheError::ConfigParsing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
        };

        let body = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
