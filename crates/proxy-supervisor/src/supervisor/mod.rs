//! Tunnel session supervisor.
//!
//! Owns the connection phase, the single live tunnel session and the set of
//! proxy configurations currently carried by it. Proxy mutations go through
//! here so the registry and the session stay in step.
//!
//! Lock order: `reconcile_gate`, then `session`, then `target` or the
//! registry writer.

mod phase;
mod poller;

pub use phase::{Phase, PhaseCell};
pub use poller::{spawn_poller, StatusPoller};

use crate::error::SupervisorError;
use crate::registry::{ProxyDefinition, ProxyDraft, ProxyRegistry};
use chrono::Utc;
use frpc_client::{
    ActiveSet, AdminClient, AdminCredentials, SessionConfig, StatusReport, TunnelConnector,
    TunnelSession,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Broker address a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerTarget {
    pub addr: String,
    pub port: u16,
}

impl ServerTarget {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into().trim().to_string(),
            port,
        }
    }

    /// An empty address or port 0 means no server is configured.
    pub fn is_configured(&self) -> bool {
        !self.addr.is_empty() && self.port != 0
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// How long `connect` watches the new session for an early failure
    pub connect_wait: Duration,
    /// Status poll period while connected
    pub poll_interval: Duration,
    /// Timeout for one admin API request
    pub status_timeout: Duration,
    /// frpc's own dial timeout towards the broker
    pub dial_server_timeout: Duration,
    /// Credentials for the tunnel client's admin plane
    pub credentials: AdminCredentials,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            connect_wait: Duration::from_secs(4),
            poll_interval: Duration::from_secs(5),
            status_timeout: Duration::from_secs(3),
            dial_server_timeout: Duration::from_secs(3),
            credentials: AdminCredentials::new("admin", "admin"),
        }
    }
}

/// Caller-visible result of `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No failure was observed within the connect wait.
    Connected,
    /// The session ended inside the connect wait.
    Failed(String),
}

/// A proxy that was enabled but could not be configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProxy {
    pub name: String,
    pub reason: String,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Remote names carried by the session afterwards
    pub active: Vec<String>,
    pub skipped: Vec<SkippedProxy>,
    /// Whether a reload was sent to the tunnel client
    pub pushed: bool,
}

/// Snapshot for the control API's server view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub server_ip: String,
    pub server_port: u16,
    pub run_status: i32,
    pub time: i64,
}

struct LiveSession {
    generation: u64,
    handle: Arc<dyn TunnelSession>,
    admin_port: u16,
    poller: CancellationToken,
}

#[derive(Default)]
struct SessionSlot {
    generation: u64,
    live: Option<LiveSession>,
    /// Validated configs for enabled proxies, keyed by remote name
    active: ActiveSet,
    /// Last configuration handed to the tunnel client
    pushed: ActiveSet,
}

struct Inner {
    registry: Arc<ProxyRegistry>,
    connector: Arc<dyn TunnelConnector>,
    settings: SupervisorSettings,
    phase: PhaseCell,
    target: RwLock<Option<ServerTarget>>,
    session: Mutex<SessionSlot>,
    reconcile_gate: Mutex<()>,
}

/// Cheaply cloneable handle to the supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        connector: Arc<dyn TunnelConnector>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                connector,
                settings,
                phase: PhaseCell::default(),
                target: RwLock::new(None),
                session: Mutex::new(SessionSlot::default()),
                reconcile_gate: Mutex::new(()),
            }),
        }
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.load()
    }

    /// The configured server, if any.
    pub async fn target(&self) -> Option<ServerTarget> {
        self.inner
            .target
            .read()
            .await
            .clone()
            .filter(ServerTarget::is_configured)
    }

    /// Remote names currently in the active set, sorted.
    pub async fn active_set(&self) -> Vec<String> {
        self.inner.session.lock().await.active.keys().cloned().collect()
    }

    /// Loopback admin port of the live session, if any.
    pub async fn admin_port(&self) -> Option<u16> {
        self.inner
            .session
            .lock()
            .await
            .live
            .as_ref()
            .map(|l| l.admin_port)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Replace any existing session with a new one to `target`.
    ///
    /// Returns once the new session has survived `connect_wait`, or as soon
    /// as it ends within that window. An unconfigured target is rejected
    /// without touching the current session; if session setup fails the
    /// previous target is restored.
    pub async fn connect(&self, target: ServerTarget) -> Result<ConnectOutcome, SupervisorError> {
        if !target.is_configured() {
            return Err(SupervisorError::Validation(
                "Server address and port are required".to_string(),
            ));
        }

        let mut slot = self.inner.session.lock().await;

        self.teardown_locked(&mut slot).await;
        self.inner.phase.transition(Phase::Idle, Phase::Connecting)?;
        let previous = self.inner.target.write().await.replace(target.clone());
        info!(server = %target, "Connecting to tunnel server");

        let started = match self.start_session_locked(&mut slot, &target).await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(te) = self.inner.phase.transition(Phase::Connecting, Phase::Idle) {
                    error!("Failed to leave connecting phase: {}", te);
                }
                *self.inner.target.write().await = previous;
                warn!(server = %target, "Connect failed: {}", e);
                return Err(e);
            }
        };
        drop(slot);

        match tokio::time::timeout(self.inner.settings.connect_wait, started).await {
            Err(_) => {
                info!(server = %target, "Tunnel session up");
                Ok(ConnectOutcome::Connected)
            }
            Ok(Ok(reason)) => {
                warn!(server = %target, reason = %reason, "Tunnel session ended during connect");
                Ok(ConnectOutcome::Failed(reason))
            }
            Ok(Err(_)) => Ok(ConnectOutcome::Failed("session task aborted".to_string())),
        }
    }

    /// Create the session, move to Connected and spawn its run task and
    /// poller. The receiver yields a reason if the run task ends.
    async fn start_session_locked(
        &self,
        slot: &mut SessionSlot,
        target: &ServerTarget,
    ) -> Result<oneshot::Receiver<String>, SupervisorError> {
        let settings = &self.inner.settings;

        let admin_port = free_loopback_port().await?;
        let mut config = SessionConfig::new(target.addr.clone(), target.port, admin_port);
        config.dial_server_timeout = settings.dial_server_timeout;
        config.validate()?;

        let definitions = self.inner.registry.list(None).await?;
        let (initial, skipped) = build_active_set(&definitions);
        for skip in &skipped {
            warn!(proxy = %skip.name, "Skipping proxy on connect: {}", skip.reason);
        }

        let handle = self
            .inner
            .connector
            .create(&config, &initial, &settings.credentials)
            .await?;
        let admin = AdminClient::for_port(
            admin_port,
            settings.credentials.clone(),
            settings.status_timeout,
        )?;

        self.inner
            .phase
            .transition(Phase::Connecting, Phase::Connected)?;

        slot.generation += 1;
        let generation = slot.generation;
        let poller = CancellationToken::new();

        slot.active = initial.clone();
        slot.pushed = initial;
        slot.live = Some(LiveSession {
            generation,
            handle: handle.clone(),
            admin_port,
            poller: poller.clone(),
        });

        let (tx, rx) = oneshot::channel();
        let supervisor = self.clone();
        tokio::spawn(async move {
            let result = handle.run().await;
            let reason = match &result {
                Ok(()) => "session ended".to_string(),
                Err(e) => e.to_string(),
            };
            let _ = tx.send(reason);
            supervisor.on_session_end(generation, result).await;
        });

        spawn_poller(self.clone(), admin, settings.poll_interval, poller);

        info!(
            generation,
            admin_port,
            proxies = slot.active.len(),
            "Tunnel session started"
        );
        Ok(rx)
    }

    async fn on_session_end(&self, generation: u64, result: Result<(), frpc_client::FrpcError>) {
        let mut slot = self.inner.session.lock().await;

        let current = slot.live.as_ref().map(|l| l.generation);
        if current != Some(generation) {
            debug!(generation, ?current, "Ignoring end of replaced session");
            return;
        }

        match result {
            Ok(()) => info!(generation, "Tunnel session ended"),
            Err(e) => {
                error!(generation, "Tunnel session failed: {}", e);
                if let Err(te) = self.inner.phase.transition(Phase::Connected, Phase::Failed) {
                    debug!("Phase already moved: {}", te);
                }
            }
        }

        self.teardown_locked(&mut slot).await;
    }

    /// Close the live session, if any, and reset all session state.
    async fn teardown_locked(&self, slot: &mut SessionSlot) {
        if let Some(live) = slot.live.take() {
            live.poller.cancel();
            live.handle.close();
            info!(generation = live.generation, "Tunnel session closed");
        }
        slot.active.clear();
        slot.pushed.clear();

        let previous = self.inner.phase.settle_idle();
        if previous != Phase::Idle {
            debug!(phase = ?previous, "Phase reset to idle");
        }

        if let Err(e) = self.reset_runtime_status().await {
            warn!("Failed to reset proxy runtime status: {}", e);
        }
    }

    /// Close the session. The target is kept.
    pub async fn disconnect(&self) -> Result<(), SupervisorError> {
        let mut slot = self.inner.session.lock().await;
        if self.target().await.is_none() {
            return Err(SupervisorError::Validation(
                "Configure and lock a server first".to_string(),
            ));
        }
        self.teardown_locked(&mut slot).await;
        info!("Disconnected from tunnel server");
        Ok(())
    }

    /// Mark every definition closed with no remote address.
    pub async fn reset_runtime_status(&self) -> Result<usize, SupervisorError> {
        self.inner
            .registry
            .update_all(ProxyDefinition::mark_closed)
            .await
    }

    pub async fn server_info(&self) -> ServerInfo {
        let target = self.target().await;
        let (server_ip, server_port) = match target {
            Some(t) => (t.addr, t.port),
            None => (frpc_client::LOOPBACK.to_string(), 0),
        };

        ServerInfo {
            server_ip,
            server_port,
            run_status: self.phase().run_status(),
            time: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Push the configuration for every enabled proxy to the live session.
    ///
    /// Invalid proxies are skipped and reported. Nothing is pushed when
    /// disconnected or when the result equals what the session already
    /// carries.
    pub async fn reconcile(&self) -> Result<ReconcileReport, SupervisorError> {
        let _gate = self.inner.reconcile_gate.lock().await;

        let definitions = self.inner.registry.list(None).await?;
        let (desired, skipped) = build_active_set(&definitions);

        let (handle, generation) = {
            let mut slot = self.inner.session.lock().await;
            let live = match slot.live.as_ref() {
                Some(live) if self.phase() == Phase::Connected => {
                    Some((live.handle.clone(), live.generation))
                }
                _ => None,
            };
            let Some(live) = live else {
                slot.active.clear();
                return Ok(ReconcileReport {
                    active: Vec::new(),
                    skipped,
                    pushed: false,
                });
            };
            if slot.pushed == desired {
                slot.active = desired;
                return Ok(ReconcileReport {
                    active: slot.active.keys().cloned().collect(),
                    skipped,
                    pushed: false,
                });
            }
            live
        };

        handle.reload(&desired).await.map_err(|e| {
            warn!(generation, "Reload failed: {}", e);
            SupervisorError::from(e)
        })?;

        let mut slot = self.inner.session.lock().await;
        let current = slot.live.as_ref().map(|l| l.generation);
        if current != Some(generation) {
            debug!(generation, "Session replaced during reload");
            return Ok(ReconcileReport {
                active: slot.active.keys().cloned().collect(),
                skipped,
                pushed: true,
            });
        }

        slot.active = desired.clone();
        slot.pushed = desired;
        info!(
            generation,
            proxies = slot.active.len(),
            "Pushed proxy configuration"
        );

        Ok(ReconcileReport {
            active: slot.active.keys().cloned().collect(),
            skipped,
            pushed: true,
        })
    }

    /// Reconcile on behalf of one proxy. Its skip becomes a validation error.
    async fn reconcile_for(&self, name: &str) -> Result<ReconcileReport, SupervisorError> {
        let report = self.reconcile().await?;
        if let Some(skip) = report.skipped.iter().find(|s| s.name == name) {
            return Err(SupervisorError::Validation(skip.reason.clone()));
        }
        Ok(report)
    }

    /// Reconcile after a mutation that already succeeded; failures are logged.
    async fn reconcile_logged(&self, trigger: &str) {
        match self.reconcile().await {
            Ok(report) => {
                for skip in &report.skipped {
                    warn!(proxy = %skip.name, trigger, "Proxy skipped: {}", skip.reason);
                }
            }
            Err(e) => warn!(trigger, "Reconcile failed: {}", e),
        }
    }

    async fn remove_active(&self, remote_name: &str) {
        let mut slot = self.inner.session.lock().await;
        slot.active.remove(remote_name);
    }

    // ------------------------------------------------------------------
    // Proxy operations
    // ------------------------------------------------------------------

    pub async fn list_proxies(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<ProxyDefinition>, SupervisorError> {
        self.inner.registry.list(filter).await
    }

    /// Create a disabled proxy.
    pub async fn add_proxy(&self, draft: ProxyDraft) -> Result<ProxyDefinition, SupervisorError> {
        let definition = self.inner.registry.add(draft).await?;
        self.reconcile_logged("add").await;
        Ok(definition)
    }

    /// Change a proxy's ports. Its enabled flag is left as it is.
    ///
    /// The new ports are persisted before they are pushed; a failed push is
    /// logged and the edit is kept, to be carried by the next reconcile.
    pub async fn edit_proxy(
        &self,
        name: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<ProxyDefinition, SupervisorError> {
        let definition = self
            .inner
            .registry
            .update(name.trim(), |d| d.set_ports(local_port, remote_port))
            .await?;
        info!(
            proxy = %definition.name,
            local_port,
            remote_port,
            "Proxy edited"
        );

        self.reconcile_logged("edit").await;
        Ok(definition)
    }

    /// Delete a proxy and drop it from the session.
    pub async fn delete_proxy(&self, name: &str) -> Result<ProxyDefinition, SupervisorError> {
        let definition = self.inner.registry.delete(name.trim()).await?;
        self.remove_active(&definition.remote_name).await;
        self.reconcile_logged("delete").await;
        Ok(definition)
    }

    /// Open (`true`) or close (`false`) a proxy.
    ///
    /// Opening requires a connected session, both before the flag is set
    /// and once the configuration has been pushed; otherwise the flag is
    /// rolled back.
    pub async fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<ProxyDefinition, SupervisorError> {
        let name = name.trim();
        self.inner.registry.get(name).await?;

        if enabled {
            if self.phase() != Phase::Connected {
                return Err(SupervisorError::NotConnected);
            }

            let definition = self
                .inner
                .registry
                .update(name, |d| {
                    d.desired_enabled = true;
                    Ok(())
                })
                .await?;

            let pushed = match self.reconcile_for(name).await {
                // The session may have dropped while the reload was in flight
                Ok(_) if self.phase() != Phase::Connected => Err(SupervisorError::NotConnected),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = pushed {
                if matches!(
                    e,
                    SupervisorError::Validation(_) | SupervisorError::NotConnected
                ) {
                    self.inner
                        .registry
                        .update(name, |d| {
                            d.desired_enabled = false;
                            Ok(())
                        })
                        .await?;
                }
                return Err(e);
            }

            info!(proxy = %name, "Proxy opened");
            Ok(definition)
        } else {
            let definition = self
                .inner
                .registry
                .update(name, |d| {
                    d.desired_enabled = false;
                    d.mark_closed();
                    Ok(())
                })
                .await?;

            self.remove_active(&definition.remote_name).await;
            self.reconcile_logged("close").await;

            info!(proxy = %name, "Proxy closed");
            Ok(definition)
        }
    }

    /// Merge a status report into the registry. Skipped unless the poller
    /// that fetched it still belongs to the connected session.
    pub(crate) async fn merge_status(
        &self,
        report: &StatusReport,
        poller: &CancellationToken,
    ) -> Result<usize, SupervisorError> {
        let slot = self.inner.session.lock().await;
        if poller.is_cancelled() || self.phase() != Phase::Connected {
            debug!("Discarding status report from a stale session");
            return Ok(0);
        }

        let index = report.by_name();
        let active = &slot.active;
        self.inner
            .registry
            .update_all(|d| {
                if active.contains_key(&d.remote_name) {
                    d.apply_status(index.get(d.remote_name.as_str()).copied());
                } else {
                    d.mark_closed();
                }
            })
            .await
    }
}

/// Validated configs for every enabled definition, in list order, plus
/// the ones that failed validation.
fn build_active_set(definitions: &[ProxyDefinition]) -> (ActiveSet, Vec<SkippedProxy>) {
    let mut active = ActiveSet::new();
    let mut skipped = Vec::new();

    for definition in definitions.iter().filter(|d| d.desired_enabled) {
        match definition.to_proxy_config() {
            Ok(config) => {
                active.insert(definition.remote_name.clone(), config);
            }
            Err(e) => skipped.push(SkippedProxy {
                name: definition.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    (active, skipped)
}

/// Pick an unused loopback port for the tunnel client's admin server.
async fn free_loopback_port() -> Result<u16, SupervisorError> {
    let listener = TcpListener::bind((frpc_client::LOOPBACK, 0))
        .await
        .map_err(|e| SupervisorError::Session(format!("no free admin port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| SupervisorError::Session(format!("no free admin port: {}", e)))?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, local_port: u16, enabled: bool, created_at: i64) -> ProxyDefinition {
        let mut d = ProxyDefinition::from_draft(
            ProxyDraft {
                name: name.into(),
                local_port,
                remote_port: 9000,
            },
            created_at,
        )
        .unwrap();
        d.desired_enabled = enabled;
        d
    }

    #[test]
    fn test_build_active_set_only_enabled() {
        let defs = vec![
            definition("web", 8080, true, 2),
            definition("db", 5432, false, 1),
        ];

        let (active, skipped) = build_active_set(&defs);
        assert_eq!(active.keys().collect::<Vec<_>>(), vec!["web_2"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_build_active_set_skips_invalid() {
        let mut broken = definition("broken", 8080, true, 3);
        broken.local_port = 0;
        let defs = vec![broken, definition("web", 8081, true, 2)];

        let (active, skipped) = build_active_set(&defs);
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("web_2"));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "broken");
    }

    #[test]
    fn test_server_target_trims() {
        let target = ServerTarget::new("  frp.example.com ", 7000);
        assert_eq!(target.addr, "frp.example.com");
        assert_eq!(target.to_string(), "frp.example.com:7000");
        assert!(target.is_configured());
    }

    #[test]
    fn test_server_target_unconfigured() {
        assert!(!ServerTarget::new("", 7000).is_configured());
        assert!(!ServerTarget::new("   ", 7000).is_configured());
        assert!(!ServerTarget::new("frp.example.com", 0).is_configured());
    }

    #[tokio::test]
    async fn test_free_loopback_port() {
        let port = free_loopback_port().await.unwrap();
        assert_ne!(port, 0);
    }
}
