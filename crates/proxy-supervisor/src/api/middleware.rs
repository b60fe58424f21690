//! Request logging and panic recovery.

use crate::error::ErrorResponse;
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::any::Any;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Log each control request with its route and latency.
///
/// Operation failures travel inside a 200 envelope; only rejections made
/// by axum itself come back with an error status.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match status {
        s if s.is_server_error() => {
            error!(%method, %path, %status, elapsed_ms, "Control request errored")
        }
        s if s.is_client_error() => {
            warn!(%method, %path, %status, elapsed_ms, "Control request rejected")
        }
        _ => debug!(%method, %path, %status, elapsed_ms, "Control request handled"),
    }

    response
}

/// Failure envelope for a handler that panicked.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Handler panicked");

    let body = ErrorResponse {
        status: -1,
        msg: "Operation failed".to_string(),
        code: "INTERNAL_ERROR".to_string(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_panic_response_is_failure_envelope() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], -1);
        assert_eq!(json["msg"], "Operation failed");
    }
}
