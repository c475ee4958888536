use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced to API callers
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or bad request field, correctable by the caller
    #[error("{0}")]
    Validation(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Discovery could not locate the device on the LAN
    #[error("could not discover the LAN address of device {0}")]
    AddressUnresolvable(String),

    #[error("lan_ip must be a bare address (e.g. 192.168.0.50) without scheme or port, got '{0}'")]
    MalformedAddress(String),

    /// Device communication failed; the cached address has been dropped
    #[error("command to device {device_id} failed: {cause}")]
    CommandFailed { device_id: String, cause: String },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Validation(_) | BridgeError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            BridgeError::AddressUnresolvable(_)
            | BridgeError::MalformedAddress(_)
            | BridgeError::CommandFailed { .. }
            | BridgeError::NotConfigured(_)
            | BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            ok: false,
            error: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::warn!(error = ?self, "Rejected request");
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
