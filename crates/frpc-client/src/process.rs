//! Tunnel sessions backed by an `frpc` child process.

use crate::admin::AdminClient;
use crate::error::FrpcError;
use crate::session::{TunnelConnector, TunnelSession};
use crate::types::{
    ActiveSet, AdminCredentials, BandwidthLimitMode, ProxyConfig, SessionConfig,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrpcFile<'a> {
    server_addr: &'a str,
    server_port: u16,
    login_fail_exit: bool,
    transport: ClientTransport,
    web_server: WebServer<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    proxies: Vec<ProxyEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientTransport {
    dial_server_timeout: u64,
}

#[derive(Serialize)]
struct WebServer<'a> {
    addr: &'a str,
    port: u16,
    user: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyEntry<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "localIP")]
    local_ip: &'a str,
    local_port: u16,
    remote_port: u16,
    transport: ProxyTransport,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyTransport {
    use_encryption: bool,
    use_compression: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bandwidth_limit: Option<String>,
    bandwidth_limit_mode: BandwidthLimitMode,
}

impl<'a> ProxyEntry<'a> {
    fn from_config(config: &'a ProxyConfig) -> Self {
        match config {
            ProxyConfig::Tcp(tcp) => Self {
                name: &tcp.name,
                kind: config.kind(),
                local_ip: &tcp.local_ip,
                local_port: tcp.local_port,
                remote_port: tcp.remote_port,
                transport: ProxyTransport {
                    use_encryption: tcp.use_encryption,
                    use_compression: tcp.use_compression,
                    bandwidth_limit: (!tcp.bandwidth_limit.is_unlimited())
                        .then(|| tcp.bandwidth_limit.to_string()),
                    bandwidth_limit_mode: tcp.bandwidth_limit_mode,
                },
            },
        }
    }
}

/// Render the frpc TOML configuration for a session and its proxies.
pub fn render_config(
    config: &SessionConfig,
    active: &ActiveSet,
    credentials: &AdminCredentials,
) -> Result<String, FrpcError> {
    let file = FrpcFile {
        server_addr: config.server_addr.trim(),
        server_port: config.server_port,
        login_fail_exit: config.login_fail_exit,
        transport: ClientTransport {
            dial_server_timeout: config.dial_server_timeout.as_secs().max(1),
        },
        web_server: WebServer {
            addr: &config.admin_addr,
            port: config.admin_port,
            user: &credentials.user,
            password: credentials.password.expose_secret(),
        },
        proxies: active.values().map(ProxyEntry::from_config).collect(),
    };

    Ok(toml::to_string(&file)?)
}

/// Write atomically using temp file + rename.
async fn write_config(path: &Path, contents: &str) -> Result<(), FrpcError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "frpc", stream, "{}", line);
    }
}

/// Launches `frpc` processes.
pub struct FrpcConnector {
    binary: PathBuf,
    work_dir: PathBuf,
    admin_timeout: Duration,
}

impl FrpcConnector {
    /// `binary` is the frpc executable; configuration files are written to `work_dir`.
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            admin_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = timeout;
        self
    }
}

#[async_trait]
impl TunnelConnector for FrpcConnector {
    async fn create(
        &self,
        config: &SessionConfig,
        initial: &ActiveSet,
        credentials: &AdminCredentials,
    ) -> Result<Arc<dyn TunnelSession>, FrpcError> {
        config.validate()?;
        for proxy in initial.values() {
            proxy.validate()?;
        }

        let config_path = self
            .work_dir
            .join(format!("frpc-{}.toml", config.admin_port));
        write_config(&config_path, &render_config(config, initial, credentials)?).await?;
        debug!(path = ?config_path, proxies = initial.len(), "Wrote frpc configuration");

        let admin = AdminClient::new(config.admin_url(), credentials.clone(), self.admin_timeout)?;

        Ok(Arc::new(FrpcSession {
            binary: self.binary.clone(),
            config_path,
            config: config.clone(),
            credentials: credentials.clone(),
            admin,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }))
    }
}

/// One `frpc` process and its configuration file.
pub struct FrpcSession {
    binary: PathBuf,
    config_path: PathBuf,
    config: SessionConfig,
    credentials: AdminCredentials,
    admin: AdminClient,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl FrpcSession {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn run_child(&self) -> Result<(), FrpcError> {
        let mut child = Command::new(&self.binary)
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        info!(
            pid = ?child.id(),
            server = %self.config.server_addr,
            port = self.config.server_port,
            "frpc started"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    info!("frpc exited");
                    Ok(())
                } else {
                    Err(FrpcError::Exited(status.to_string()))
                }
            }
            _ = self.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill frpc: {}", e);
                }
                info!("frpc stopped");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TunnelSession for FrpcSession {
    async fn run(&self) -> Result<(), FrpcError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FrpcError::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let result = self.run_child().await;

        // The file carries the admin password.
        if let Err(e) = fs::remove_file(&self.config_path).await {
            debug!("Could not remove {:?}: {}", self.config_path, e);
        }
        result
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    async fn reload(&self, active: &ActiveSet) -> Result<(), FrpcError> {
        for proxy in active.values() {
            proxy.validate()?;
        }
        let rendered = render_config(&self.config, active, &self.credentials)?;
        write_config(&self.config_path, &rendered).await?;
        self.admin.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TcpProxyConfig;

    fn active_with(proxies: &[(&str, u16, u16)]) -> ActiveSet {
        proxies
            .iter()
            .map(|(name, local, remote)| {
                (
                    name.to_string(),
                    ProxyConfig::Tcp(TcpProxyConfig::new(*name, *local, *remote)),
                )
            })
            .collect()
    }

    #[test]
    fn test_render_config_session_fields() {
        let config = SessionConfig::new("frp.example.com", 7000, 7400);
        let rendered =
            render_config(&config, &ActiveSet::new(), &AdminCredentials::new("admin", "admin"))
                .unwrap();

        let doc: toml::Value = toml::from_str(&rendered).unwrap();
        assert_eq!(doc["serverAddr"].as_str(), Some("frp.example.com"));
        assert_eq!(doc["serverPort"].as_integer(), Some(7000));
        assert_eq!(doc["loginFailExit"].as_bool(), Some(true));
        assert_eq!(doc["transport"]["dialServerTimeout"].as_integer(), Some(3));
        assert_eq!(doc["webServer"]["port"].as_integer(), Some(7400));
        assert_eq!(doc["webServer"]["user"].as_str(), Some("admin"));
        assert!(doc.get("proxies").is_none());
    }

    #[test]
    fn test_render_config_proxies() {
        let config = SessionConfig::new("frp.example.com", 7000, 7400);
        let active = active_with(&[("web_1", 8080, 9000), ("ssh_2", 22, 6000)]);
        let rendered =
            render_config(&config, &active, &AdminCredentials::new("admin", "admin")).unwrap();

        let doc: toml::Value = toml::from_str(&rendered).unwrap();
        let proxies = doc["proxies"].as_array().unwrap();
        assert_eq!(proxies.len(), 2);

        let web = proxies
            .iter()
            .find(|p| p["name"].as_str() == Some("web_1"))
            .unwrap();
        assert_eq!(web["type"].as_str(), Some("tcp"));
        assert_eq!(web["localIP"].as_str(), Some("127.0.0.1"));
        assert_eq!(web["localPort"].as_integer(), Some(8080));
        assert_eq!(web["remotePort"].as_integer(), Some(9000));
        assert_eq!(web["transport"]["useEncryption"].as_bool(), Some(false));
        assert_eq!(web["transport"]["bandwidthLimitMode"].as_str(), Some("client"));
        assert!(web["transport"].get("bandwidthLimit").is_none());
    }

    #[test]
    fn test_render_config_bandwidth_limit() {
        let config = SessionConfig::new("frp.example.com", 7000, 7400);
        let mut tcp = TcpProxyConfig::new("web_1", 8080, 9000);
        tcp.bandwidth_limit = "2MB".parse().unwrap();
        let mut active = ActiveSet::new();
        active.insert("web_1".into(), ProxyConfig::Tcp(tcp));

        let rendered =
            render_config(&config, &active, &AdminCredentials::new("admin", "admin")).unwrap();
        let doc: toml::Value = toml::from_str(&rendered).unwrap();
        assert_eq!(
            doc["proxies"][0]["transport"]["bandwidthLimit"].as_str(),
            Some("2MB")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_session() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FrpcConnector::new("frpc", dir.path());
        let config = SessionConfig::new("", 7000, 7400);

        let result = connector
            .create(&config, &ActiveSet::new(), &AdminCredentials::new("admin", "admin"))
            .await;
        assert!(matches!(result, Err(FrpcError::InvalidSession(_))));
    }

    #[tokio::test]
    async fn test_create_writes_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FrpcConnector::new("frpc", dir.path());
        let config = SessionConfig::new("frp.example.com", 7000, 7400);

        connector
            .create(
                &config,
                &active_with(&[("web_1", 8080, 9000)]),
                &AdminCredentials::new("admin", "admin"),
            )
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("frpc-7400.toml")).unwrap();
        assert!(written.contains("web_1"));
    }

    #[tokio::test]
    async fn test_run_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FrpcConnector::new(dir.path().join("no-such-frpc"), dir.path());
        let config = SessionConfig::new("frp.example.com", 7000, 7400);

        let session = connector
            .create(&config, &ActiveSet::new(), &AdminCredentials::new("admin", "admin"))
            .await
            .unwrap();

        assert!(matches!(session.run().await, Err(FrpcError::Io(_))));
        assert!(matches!(session.run().await, Err(FrpcError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_run_after_close_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FrpcConnector::new(dir.path().join("no-such-frpc"), dir.path());
        let config = SessionConfig::new("frp.example.com", 7000, 7400);

        let session = connector
            .create(&config, &ActiveSet::new(), &AdminCredentials::new("admin", "admin"))
            .await
            .unwrap();
        session.close();

        assert!(session.run().await.is_ok());
    }
}
