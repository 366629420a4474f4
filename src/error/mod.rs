// Error types for lazarus-sw
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Install failed for {version}: {reason}")]
    InstallFailed { version: String, reason: String },

    #[error("Activation failed for {version}: {reason}")]
    ActivationFailed { version: String, reason: String },

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("No worker is controlling requests")]
    NoController,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// True when the upstream could not be reached at all (the fetch rejected).
    pub fn is_network_failure(&self) -> bool {
        matches!(self, ProxyError::UpstreamUnavailable(_) | ProxyError::Http(_))
    }
}

// Convert ProxyError to HTTP responses for Axum
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ProxyError::UpstreamUnavailable(_) | ProxyError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "network_error", self.to_string())
            }
            ProxyError::BadStatus { .. } => {
                (StatusCode::BAD_GATEWAY, "upstream_status_error", self.to_string())
            }
            ProxyError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", self.to_string())
            }
            ProxyError::NoController => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_controller", self.to_string())
            }
            ProxyError::Config(_) | ProxyError::ConfigParsing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error", self.to_string())
            }
            ProxyError::InstallFailed { .. } | ProxyError::ActivationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "lifecycle_error", self.to_string())
            }
            ProxyError::Storage(_) | ProxyError::Io(_) | ProxyError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", self.to_string())
            }
            ProxyError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", self.to_string())
            }
        };

        let body = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
