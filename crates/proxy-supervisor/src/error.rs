//! Error types for the proxy supervisor.

use crate::supervisor::Phase;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use frpc_client::FrpcError;
use serde::Serialize;
use thiserror::Error;

/// Supervisor error types.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0}")]
    Validation(String),

    #[error("Proxy not found: {0}")]
    NotFound(String),

    #[error("Not connected to a tunnel server")]
    NotConnected,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Tunnel session error: {0}")]
    Session(String),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::Validation(_) => "VALIDATION",
            SupervisorError::NotFound(_) => "NOT_FOUND",
            SupervisorError::NotConnected => "NOT_CONNECTED",
            SupervisorError::Storage(_) => "STORAGE_ERROR",
            SupervisorError::Session(_) => "SESSION_ERROR",
            SupervisorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SupervisorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failure envelope. The control UI reads `status`/`msg` from every
/// response body, so failures are delivered with HTTP 200.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: i32,
    pub msg: String,
    pub code: String,
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        // Storage details stay in the log.
        let msg = match &self {
            SupervisorError::Storage(_) | SupervisorError::Internal(_) => {
                "Operation failed".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            status: -1,
            msg,
            code: self.code().to_string(),
        };

        (StatusCode::OK, Json(body)).into_response()
    }
}

impl From<std::io::Error> for SupervisorError {
    fn from(e: std::io::Error) -> Self {
        SupervisorError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(e: serde_json::Error) -> Self {
        SupervisorError::Storage(format!("JSON serialization error: {}", e))
    }
}

impl From<FrpcError> for SupervisorError {
    fn from(e: FrpcError) -> Self {
        if e.is_validation() {
            SupervisorError::Validation(e.to_string())
        } else {
            SupervisorError::Session(e.to_string())
        }
    }
}

impl From<JsonRejection> for SupervisorError {
    fn from(rejection: JsonRejection) -> Self {
        SupervisorError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}
