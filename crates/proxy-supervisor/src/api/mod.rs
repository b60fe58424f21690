//! HTTP control API for the proxy supervisor.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{logging_middleware, panic_response};
pub use types::*;

use crate::supervisor::Supervisor;
use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
}

impl AppState {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Proxy management
        .route("/api/getProxy", get(handlers::get_proxies))
        .route("/api/addProxy", post(handlers::add_proxy))
        .route("/api/editProxy", post(handlers::edit_proxy))
        .route("/api/delProxy", post(handlers::delete_proxy))
        .route("/api/openProxy", put(handlers::open_proxy))
        // Server session
        .route("/api/connect", post(handlers::connect))
        .route("/api/unlock", get(handlers::unlock))
        .route("/api/getServer", get(handlers::get_server))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}
