//! Error types for sysdeck.
//!
//! Every failure in the sampling path is local: callers log it and keep
//! ticking. Only the gateway turns errors into responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors raised by the history store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation attempted before `init()` or after `close()`.
    #[error("History storage is not available")]
    StorageUnavailable,

    #[error("Failed to open history database: {0}")]
    Open(String),

    /// Insert or delete failed. The sample is lost; the next tick writes fresh.
    #[error("History write failed: {0}")]
    WriteFailed(String),

    #[error("History read failed: {0}")]
    ReadFailed(String),
}

/// Errors raised while binding or running the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Port {port} already in use ({endpoint} endpoint)")]
    PortInUse { endpoint: &'static str, port: u16 },

    #[error("Failed to bind {endpoint} endpoint on port {port}: {reason}")]
    Bind {
        endpoint: &'static str,
        port: u16,
        reason: String,
    },

    #[error("No gateway endpoint could be bound")]
    NoEndpoints,

    #[error("Gateway config error: {0}")]
    Config(String),

    #[error(transparent)]
    Settings(#[from] ConfigError),

    #[error("Gateway is shutting down")]
    Gone,
}

/// Configuration and settings errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

/// Errors raised by a sample source.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Sample source unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the gateway client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Gateway network error: {0}")]
    Network(String),

    /// The gateway answered with a non-success status.
    #[error("Gateway server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Gateway rejected the token")]
    Unauthorized,

    #[error("Failed to decode gateway response: {0}")]
    Decode(String),

    #[error("Gave up after {0} reconnect attempts")]
    GaveUp(u32),
}

/// Errors returned by the gateway HTTP API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Store(StoreError::StorageUnavailable) => "STORAGE_UNAVAILABLE",
            ApiError::Store(_) => "STORAGE_ERROR",
            ApiError::Config(ConfigError::InvalidTimezone(_) | ConfigError::Parse(_)) => {
                "INVALID_SETTINGS"
            }
            ApiError::Config(_) => "SETTINGS_ERROR",
            ApiError::Gateway(GatewayError::Gone) => "GATEWAY_UNAVAILABLE",
            ApiError::Gateway(_) => "GATEWAY_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::StorageUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Config(ConfigError::InvalidTimezone(_) | ConfigError::Parse(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Gateway(GatewayError::Gone) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(StoreError::StorageUnavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ConfigError::InvalidTimezone("Mars/Base".into())).code(),
            "INVALID_SETTINGS"
        );
    }

    #[test]
    fn test_gateway_errors_map_to_envelope_codes() {
        let gone = ApiError::from(GatewayError::Gone);
        assert_eq!(gone.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(gone.code(), "GATEWAY_UNAVAILABLE");
        assert_eq!(ApiError::from(GatewayError::NoEndpoints).code(), "GATEWAY_ERROR");
    }

    #[test]
    fn test_port_in_use_message() {
        let err = GatewayError::PortInUse {
            endpoint: "api",
            port: 47802,
        };
        assert_eq!(err.to_string(), "Port 47802 already in use (api endpoint)");
    }
}
