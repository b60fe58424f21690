//! Proxy definitions and their durable registry.

mod proxies;
mod store;

pub use proxies::ProxyRegistry;
pub use store::{FileStore, MemoryStore, Store};

use crate::error::SupervisorError;
use frpc_client::{FrpcError, ProxyConfig, ProxyPhase, ProxyStatusEntry, TcpProxyConfig};
use serde::{Deserialize, Serialize};

/// Collection holding one record per proxy definition.
pub const PROXY_COLLECTION: &str = "proxys";

/// Remote address shown while a proxy is not running.
pub const NO_REMOTE_ADDR: &str = "none";

/// Kind of forward a definition describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    #[serde(alias = "TCP")]
    Tcp,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Tcp => "tcp",
        }
    }
}

/// Operator input for a new proxy.
#[derive(Debug, Clone)]
pub struct ProxyDraft {
    pub name: String,
    pub local_port: u16,
    pub remote_port: u16,
}

/// A named local → remote port forward, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDefinition {
    /// Local, operator-facing name (unique)
    #[serde(rename = "proxyName")]
    pub name: String,

    /// Name the broker sees: `{name}_{created_at}`
    #[serde(rename = "remoteProxyName")]
    pub remote_name: String,

    #[serde(rename = "localPort")]
    pub local_port: u16,

    #[serde(rename = "remotePort")]
    pub remote_port: u16,

    #[serde(rename = "type", default)]
    pub proxy_type: ProxyType,

    /// Operator intent: should this proxy be carried by the session
    #[serde(rename = "status", default)]
    pub desired_enabled: bool,

    /// Last phase observed from the tunnel client
    #[serde(rename = "runStatus", default)]
    pub run_status: ProxyPhase,

    /// Creation time in nanoseconds since the epoch
    #[serde(rename = "addTime")]
    pub created_at: i64,

    /// Last public address observed from the tunnel client
    #[serde(rename = "remote_addr", default = "default_remote_addr")]
    pub remote_addr: String,

    /// Last error reported by the tunnel client, empty when none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn default_remote_addr() -> String {
    NO_REMOTE_ADDR.to_string()
}

impl ProxyDefinition {
    /// Build a disabled TCP definition from operator input.
    pub fn from_draft(draft: ProxyDraft, created_at: i64) -> Result<Self, SupervisorError> {
        let name = normalize_proxy_name(&draft.name).map_err(SupervisorError::Validation)?;
        validate_port("localPort", draft.local_port)?;
        validate_port("remotePort", draft.remote_port)?;

        let definition = Self {
            remote_name: format!("{}_{}", name, created_at),
            name,
            local_port: draft.local_port,
            remote_port: draft.remote_port,
            proxy_type: ProxyType::Tcp,
            desired_enabled: false,
            run_status: ProxyPhase::Closed,
            created_at,
            remote_addr: default_remote_addr(),
            error: String::new(),
        };
        definition.to_proxy_config()?;
        Ok(definition)
    }

    /// Change the forwarded ports. Name and remote name never change.
    pub fn set_ports(&mut self, local_port: u16, remote_port: u16) -> Result<(), SupervisorError> {
        validate_port("localPort", local_port)?;
        validate_port("remotePort", remote_port)?;
        self.local_port = local_port;
        self.remote_port = remote_port;
        self.to_proxy_config()?;
        Ok(())
    }

    /// Build and validate the client-side configuration for this proxy.
    pub fn to_proxy_config(&self) -> Result<ProxyConfig, FrpcError> {
        let config = match self.proxy_type {
            ProxyType::Tcp => ProxyConfig::Tcp(TcpProxyConfig::new(
                self.remote_name.clone(),
                self.local_port,
                self.remote_port,
            )),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reset the runtime view to "not running".
    pub fn mark_closed(&mut self) {
        self.run_status = ProxyPhase::Closed;
        self.remote_addr = default_remote_addr();
        self.error.clear();
    }

    /// Merge one entry of the tunnel client's status report. A missing
    /// entry means the proxy is not running.
    pub fn apply_status(&mut self, entry: Option<&ProxyStatusEntry>) {
        match entry {
            Some(entry) => {
                self.run_status = entry.phase();
                self.remote_addr = if entry.remote_addr.is_empty() {
                    default_remote_addr()
                } else {
                    entry.remote_addr.clone()
                };
                self.error = entry.err.trim().to_string();
            }
            None => self.mark_closed(),
        }
    }
}

/// Trim and check a proxy name. Names double as storage keys.
pub fn normalize_proxy_name(name: &str) -> Result<String, String> {
    let name = name.trim();

    if name.is_empty() {
        return Err("Proxy name must not be empty".into());
    }
    if name.len() > 64 {
        return Err("Proxy name must be at most 64 characters".into());
    }
    if name.starts_with('.') {
        return Err("Proxy name must not start with '.'".into());
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':'))
    {
        return Err("Proxy name contains invalid characters".into());
    }

    Ok(name.to_string())
}

fn validate_port(field: &str, port: u16) -> Result<(), SupervisorError> {
    if port == 0 {
        return Err(SupervisorError::Validation(format!(
            "{} must be between 1 and 65535",
            field
        )));
    }
    Ok(())
}
