//! API request and response types.
//!
//! Field names follow the control UI's JSON contract.

use crate::registry::ProxyDefinition;
use crate::supervisor::Phase;
use frpc_client::ProxyPhase;
use serde::{Deserialize, Serialize};

pub const MSG_OK: &str = "Operation succeeded";

/// `{status, msg, data}` envelope used by most endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResult<T> {
    pub status: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 0,
            msg: MSG_OK.to_string(),
            data: Some(data),
        }
    }
}

impl ApiResult<()> {
    pub fn message(status: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn success() -> Self {
        Self::message(0, MSG_OK)
    }
}

/// `{responseStatus, responseMsg}` envelope used by delete, open and unlock.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AjaxResult {
    pub response_status: i32,
    pub response_msg: String,
}

impl AjaxResult {
    pub fn success() -> Self {
        Self {
            response_status: 0,
            response_msg: MSG_OK.to_string(),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            response_status: -1,
            response_msg: msg.into(),
        }
    }
}

/// One row of the proxy table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyView {
    pub proxy_name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub local_port: u16,
    pub remote_port: u16,
    /// Operator intent
    pub status: bool,
    pub run_status: ProxyPhase,
    pub remote_addr: String,
    /// Tunnel client error for this proxy, empty when none
    pub error: String,
    pub add_time: i64,
}

impl From<ProxyDefinition> for ProxyView {
    fn from(d: ProxyDefinition) -> Self {
        Self {
            proxy_type: d.proxy_type.as_str().to_string(),
            proxy_name: d.name,
            local_port: d.local_port,
            remote_port: d.remote_port,
            status: d.desired_enabled,
            run_status: d.run_status,
            remote_addr: d.remote_addr,
            error: d.error,
            add_time: d.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProxyRows {
    pub rows: Vec<ProxyView>,
    pub time: i64,
}

/// Query string for getProxy.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyQuery {
    pub proxy_name: Option<String>,
}

/// Body of addProxy and editProxy.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub proxy_name: String,
    pub local_port: u16,
    pub remote_port: u16,
}

/// Body of delProxy.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProxyRequest {
    pub proxy_name: String,
}

/// Body of openProxy.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenProxyRequest {
    pub proxy_name: String,
    pub status: bool,
}

/// Body of connect.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub server_ip: String,
    pub server_port: u16,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub proxies: usize,
    pub phase: Phase,
}
