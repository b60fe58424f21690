//! Proxy, session and status types shared with the frpc process.

use crate::error::FrpcError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Loopback address used for local services and the admin plane.
pub const LOOPBACK: &str = "127.0.0.1";

/// Proxy configurations currently pushed to a session, keyed by remote proxy name.
pub type ActiveSet = BTreeMap<String, ProxyConfig>;

/// Which side enforces a bandwidth limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthLimitMode {
    #[default]
    Client,
    Server,
}

/// Bandwidth limit in bytes per second. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthLimit {
    bytes: u64,
}

impl BandwidthLimit {
    pub const UNLIMITED: BandwidthLimit = BandwidthLimit { bytes: 0 };

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes == 0
    }
}

impl FromStr for BandwidthLimit {
    type Err = FrpcError;

    /// Parses the frpc quantity format: empty, `<n>KB` or `<n>MB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::UNLIMITED);
        }

        let (digits, unit) = if let Some(d) = s.strip_suffix("MB") {
            (d, 1024 * 1024)
        } else if let Some(d) = s.strip_suffix("KB") {
            (d, 1024)
        } else {
            return Err(FrpcError::InvalidProxy(format!(
                "bandwidth limit '{}' must end with KB or MB",
                s
            )));
        };

        let value: u64 = digits.trim().parse().map_err(|_| {
            FrpcError::InvalidProxy(format!("bandwidth limit '{}' is not a whole number", s))
        })?;
        if value == 0 {
            return Err(FrpcError::InvalidProxy(
                "bandwidth limit must be positive".to_string(),
            ));
        }

        let bytes = value.checked_mul(unit).ok_or_else(|| {
            FrpcError::InvalidProxy(format!("bandwidth limit '{}' is too large", s))
        })?;

        Ok(Self { bytes })
    }
}

impl fmt::Display for BandwidthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024 * 1024;
        match self.bytes {
            0 => Ok(()),
            b if b % MB == 0 => write!(f, "{}MB", b / MB),
            b => write!(f, "{}KB", b / 1024),
        }
    }
}

/// A TCP port forward as frpc understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProxyConfig {
    pub name: String,
    pub local_ip: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub use_encryption: bool,
    pub use_compression: bool,
    pub bandwidth_limit: BandwidthLimit,
    pub bandwidth_limit_mode: BandwidthLimitMode,
}

impl TcpProxyConfig {
    /// Forward `127.0.0.1:local_port` to `remote_port` on the server, with
    /// encryption and compression off and no bandwidth limit.
    pub fn new(name: impl Into<String>, local_port: u16, remote_port: u16) -> Self {
        Self {
            name: name.into(),
            local_ip: LOOPBACK.to_string(),
            local_port,
            remote_port,
            use_encryption: false,
            use_compression: false,
            bandwidth_limit: BandwidthLimit::UNLIMITED,
            bandwidth_limit_mode: BandwidthLimitMode::Client,
        }
    }

    pub fn validate(&self) -> Result<(), FrpcError> {
        if self.name.trim().is_empty() {
            return Err(FrpcError::InvalidProxy("proxy name is empty".to_string()));
        }
        if self.local_ip.parse::<IpAddr>().is_err() {
            return Err(FrpcError::InvalidProxy(format!(
                "local IP '{}' is not an IP address",
                self.local_ip
            )));
        }
        if self.local_port == 0 {
            return Err(FrpcError::InvalidProxy(format!(
                "proxy '{}' has no local port",
                self.name
            )));
        }
        Ok(())
    }
}

/// Client-side configuration of one proxy, tagged by proxy kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyConfig {
    Tcp(TcpProxyConfig),
}

impl ProxyConfig {
    pub fn name(&self) -> &str {
        match self {
            ProxyConfig::Tcp(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyConfig::Tcp(_) => "tcp",
        }
    }

    pub fn validate(&self) -> Result<(), FrpcError> {
        match self {
            ProxyConfig::Tcp(c) => c.validate(),
        }
    }
}

/// Static credential pair for the frpc admin web server.
pub struct AdminCredentials {
    pub user: String,
    pub password: SecretString,
}

impl AdminCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl Clone for AdminCredentials {
    fn clone(&self) -> Self {
        Self {
            user: self.user.clone(),
            password: SecretString::new(self.password.expose_secret().clone()),
        }
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Connection settings for one tunnel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub server_addr: String,
    pub server_port: u16,
    pub admin_addr: String,
    pub admin_port: u16,
    pub dial_server_timeout: Duration,
    /// Exit instead of retrying when the first login is rejected.
    pub login_fail_exit: bool,
}

impl SessionConfig {
    pub fn new(server_addr: impl Into<String>, server_port: u16, admin_port: u16) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port,
            admin_addr: LOOPBACK.to_string(),
            admin_port,
            dial_server_timeout: Duration::from_secs(3),
            login_fail_exit: true,
        }
    }

    pub fn validate(&self) -> Result<(), FrpcError> {
        let addr = self.server_addr.trim();
        if addr.is_empty() {
            return Err(FrpcError::InvalidSession("server address is empty".to_string()));
        }
        if addr.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(FrpcError::InvalidSession(format!(
                "server address '{}' is malformed",
                addr
            )));
        }
        if self.server_port == 0 {
            return Err(FrpcError::InvalidSession("server port is zero".to_string()));
        }
        if self.admin_port == 0 {
            return Err(FrpcError::InvalidSession("admin port is zero".to_string()));
        }
        Ok(())
    }

    /// Base URL of the admin web server.
    pub fn admin_url(&self) -> String {
        format!("http://{}:{}", self.admin_addr, self.admin_port)
    }
}

/// Lifecycle phase of a proxy as reported by frpc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyPhase {
    Running,
    StartError,
    #[default]
    Closed,
    Unknown,
}

impl ProxyPhase {
    /// Map the admin API's status string. Transitional phases
    /// (`new`, `wait start`, `check failed`) collapse to `Unknown`.
    pub fn from_report(status: &str) -> Self {
        match status.trim() {
            "running" => ProxyPhase::Running,
            "start error" | "start_error" => ProxyPhase::StartError,
            "closed" => ProxyPhase::Closed,
            _ => ProxyPhase::Unknown,
        }
    }
}

/// One proxy entry from `GET /api/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyStatusEntry {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub local_addr: String,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub remote_addr: String,
}

impl ProxyStatusEntry {
    pub fn phase(&self) -> ProxyPhase {
        ProxyPhase::from_report(&self.status)
    }
}

/// Response body of `GET /api/status`, grouped by proxy kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub tcp: Vec<ProxyStatusEntry>,
}

impl StatusReport {
    /// Index entries by remote proxy name.
    pub fn by_name(&self) -> HashMap<&str, &ProxyStatusEntry> {
        self.tcp.iter().map(|e| (e.name.as_str(), e)).collect()
    }
}
