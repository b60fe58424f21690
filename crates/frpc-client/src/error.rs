//! frpc client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    #[error("Invalid session configuration: {0}")]
    InvalidSession(String),

    #[error("Failed to render frpc configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Admin API error: {status} - {body}")]
    Admin { status: u16, body: String },

    #[error("frpc exited with {0}")]
    Exited(String),

    #[error("Session already started")]
    AlreadyStarted,
}

impl FrpcError {
    /// Whether the error comes from validating operator-supplied configuration.
    pub fn is_validation(&self) -> bool {
        matches!(self, FrpcError::InvalidProxy(_) | FrpcError::InvalidSession(_))
    }
}
