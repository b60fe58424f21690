//! Configuration for the proxy supervisor.

use crate::supervisor::SupervisorSettings;
use anyhow::{Context, Result};
use frpc_client::AdminCredentials;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Supervisor configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Control API listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Proxy definition storage
    #[serde(default)]
    pub store: StoreConfig,

    /// frpc executable and admin plane
    #[serde(default)]
    pub frpc: FrpcConfig,

    /// Session supervision timings
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one JSON file per record
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,

    /// Enable persistence (if false, definitions are in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Deserialize)]
pub struct FrpcConfig {
    /// Path to the frpc executable
    #[serde(default = "default_frpc_binary")]
    pub binary: PathBuf,

    /// Where generated frpc configuration files are written
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Admin web server user
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    /// Admin web server password
    #[serde(default = "default_admin_password")]
    pub admin_password: SecretString,

    /// frpc's dial timeout towards the broker
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// How long a connect request watches for an early session failure
    #[serde(default = "default_connect_wait", with = "humantime_serde")]
    pub connect_wait: Duration,

    /// Status poll period while connected
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Timeout for one admin API request
    #[serde(default = "default_status_timeout", with = "humantime_serde")]
    pub status_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            persist: true,
        }
    }
}

impl Default for FrpcConfig {
    fn default() -> Self {
        Self {
            binary: default_frpc_binary(),
            work_dir: default_work_dir(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            dial_timeout: default_dial_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_wait: default_connect_wait(),
            poll_interval: default_poll_interval(),
            status_timeout: default_status_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8088
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./store")
}

fn default_true() -> bool {
    true
}

fn default_frpc_binary() -> PathBuf {
    PathBuf::from("frpc")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./run")
}

fn default_admin_user() -> String {
    "admin".into()
}

fn default_admin_password() -> SecretString {
    SecretString::new("admin".into())
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_connect_wait() -> Duration {
    Duration::from_secs(4)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn admin_credentials(&self) -> AdminCredentials {
        AdminCredentials::new(
            self.frpc.admin_user.clone(),
            self.frpc.admin_password.expose_secret().clone(),
        )
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            connect_wait: self.supervisor.connect_wait,
            poll_interval: self.supervisor.poll_interval,
            status_timeout: self.supervisor.status_timeout,
            dial_server_timeout: self.frpc.dial_timeout,
            credentials: self.admin_credentials(),
        }
    }
}
