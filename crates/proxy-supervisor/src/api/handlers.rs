//! HTTP request handlers.

use super::types::{
    AjaxResult, ApiResult, ConnectRequest, DeleteProxyRequest, HealthResponse, OpenProxyRequest,
    ProxyQuery, ProxyRequest, ProxyRows, ProxyView,
};
use super::AppState;
use crate::error::SupervisorError;
use crate::registry::ProxyDraft;
use crate::supervisor::{ConnectOutcome, ServerInfo, ServerTarget};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use chrono::Utc;
use tracing::{info, warn};

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, SupervisorError> {
    let proxies = state.supervisor.registry().count().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        proxies,
        phase: state.supervisor.phase(),
    }))
}

/// List proxies, newest first.
pub async fn get_proxies(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Json<ApiResult<ProxyRows>>, SupervisorError> {
    let filter = query
        .proxy_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let definitions = state.supervisor.list_proxies(filter).await?;

    Ok(Json(ApiResult::ok(ProxyRows {
        rows: definitions.into_iter().map(ProxyView::from).collect(),
        time: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
    })))
}

/// Create a disabled proxy.
pub async fn add_proxy(
    State(state): State<AppState>,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ApiResult<()>>, SupervisorError> {
    let Json(request) = payload?;
    let definition = state
        .supervisor
        .add_proxy(ProxyDraft {
            name: request.proxy_name,
            local_port: request.local_port,
            remote_port: request.remote_port,
        })
        .await?;

    info!(proxy = %definition.name, "Add proxy request completed");
    Ok(Json(ApiResult::success()))
}

/// Change a proxy's ports.
pub async fn edit_proxy(
    State(state): State<AppState>,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ApiResult<()>>, SupervisorError> {
    let Json(request) = payload?;
    state
        .supervisor
        .edit_proxy(&request.proxy_name, request.local_port, request.remote_port)
        .await?;

    Ok(Json(ApiResult::success()))
}

pub async fn delete_proxy(
    State(state): State<AppState>,
    payload: Result<Json<DeleteProxyRequest>, JsonRejection>,
) -> Result<Json<AjaxResult>, SupervisorError> {
    let Json(request) = payload?;
    state.supervisor.delete_proxy(&request.proxy_name).await?;
    Ok(Json(AjaxResult::success()))
}

/// Open or close a proxy.
pub async fn open_proxy(
    State(state): State<AppState>,
    payload: Result<Json<OpenProxyRequest>, JsonRejection>,
) -> Result<Json<AjaxResult>, SupervisorError> {
    let Json(request) = payload?;
    state
        .supervisor
        .set_enabled(&request.proxy_name, request.status)
        .await?;

    Ok(Json(AjaxResult::success()))
}

/// Connect to a tunnel server, replacing any current session.
pub async fn connect(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<ApiResult<()>>, SupervisorError> {
    let Json(request) = payload?;
    let target = ServerTarget::new(request.server_ip, request.server_port);

    match state.supervisor.connect(target).await? {
        ConnectOutcome::Connected => Ok(Json(ApiResult::message(0, "Connected"))),
        ConnectOutcome::Failed(reason) => {
            warn!(reason = %reason, "Connect request failed");
            Ok(Json(ApiResult::message(
                -1,
                "Connection failed, check the server configuration",
            )))
        }
    }
}

/// Close the session. Requires a configured server.
pub async fn unlock(State(state): State<AppState>) -> Json<AjaxResult> {
    match state.supervisor.disconnect().await {
        Ok(()) => Json(AjaxResult::success()),
        Err(e) => Json(AjaxResult::failure(e.to_string())),
    }
}

pub async fn get_server(State(state): State<AppState>) -> Json<ApiResult<ServerInfo>> {
    Json(ApiResult::ok(state.supervisor.server_info().await))
}
