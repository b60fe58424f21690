//! Shared fixtures for supervisor and API tests.

#![allow(dead_code)]

use async_trait::async_trait;
use frpc_client::{
    ActiveSet, AdminCredentials, FrpcError, SessionConfig, TunnelConnector, TunnelSession,
};
use proxy_supervisor::{ProxyRegistry, Store, Supervisor, SupervisorSettings};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Scripted tunnel session that records every reload.
#[derive(Default)]
pub struct FakeSession {
    pub initial: ActiveSet,
    closed: CancellationToken,
    failed: CancellationToken,
    fail_immediately: Option<String>,
    reload_error: Option<String>,
    drop_on_reload: bool,
    reloads: Mutex<Vec<ActiveSet>>,
}

impl FakeSession {
    /// Make `run` return an error, as if frpc exited.
    pub fn fail(&self) {
        self.failed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn reloads(&self) -> Vec<ActiveSet> {
        self.reloads.lock().unwrap().clone()
    }

    /// Remote names of the most recent reload.
    pub fn last_pushed(&self) -> Option<Vec<String>> {
        self.reloads
            .lock()
            .unwrap()
            .last()
            .map(|set| set.keys().cloned().collect())
    }
}

#[async_trait]
impl TunnelSession for FakeSession {
    async fn run(&self) -> Result<(), FrpcError> {
        if let Some(reason) = &self.fail_immediately {
            return Err(FrpcError::Exited(reason.clone()));
        }
        tokio::select! {
            _ = self.closed.cancelled() => Ok(()),
            _ = self.failed.cancelled() => Err(FrpcError::Exited("exit status: 1".to_string())),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn reload(&self, active: &ActiveSet) -> Result<(), FrpcError> {
        if self.drop_on_reload {
            // Let the run task end and the supervisor tear down first
            self.failed.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let Some(body) = &self.reload_error {
            return Err(FrpcError::Admin {
                status: 500,
                body: body.clone(),
            });
        }
        self.reloads.lock().unwrap().push(active.clone());
        Ok(())
    }
}

/// Connector handing out [`FakeSession`]s.
#[derive(Default)]
pub struct FakeConnector {
    /// `create` fails with this message
    pub create_error: Option<String>,
    /// Every session's `run` fails at once with this message
    pub run_error: Option<String>,
    /// Every session's `reload` is rejected with this body
    pub reload_error: Option<String>,
    /// Every session exits while a reload is in flight
    pub drop_on_reload: bool,
    /// `create` waits for a notification first
    pub gate: Option<Arc<Notify>>,
    pub created: Mutex<Vec<(SessionConfig, Arc<FakeSession>)>>,
}

impl FakeConnector {
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions().last().cloned().expect("no session created")
    }
}

#[async_trait]
impl TunnelConnector for FakeConnector {
    async fn create(
        &self,
        config: &SessionConfig,
        initial: &ActiveSet,
        _credentials: &AdminCredentials,
    ) -> Result<Arc<dyn TunnelSession>, FrpcError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.create_error {
            return Err(FrpcError::Exited(message.clone()));
        }

        let session = Arc::new(FakeSession {
            initial: initial.clone(),
            fail_immediately: self.run_error.clone(),
            reload_error: self.reload_error.clone(),
            drop_on_reload: self.drop_on_reload,
            ..FakeSession::default()
        });
        self.created
            .lock()
            .unwrap()
            .push((config.clone(), session.clone()));
        Ok(session as Arc<dyn TunnelSession>)
    }
}

/// Short connect wait, and a poll interval long enough that the
/// background poller never fires during a test.
pub fn test_settings() -> SupervisorSettings {
    SupervisorSettings {
        connect_wait: Duration::from_millis(50),
        poll_interval: Duration::from_secs(3600),
        status_timeout: Duration::from_secs(1),
        ..SupervisorSettings::default()
    }
}

pub fn supervisor_with(connector: FakeConnector) -> (Supervisor, Arc<FakeConnector>) {
    let connector = Arc::new(connector);
    let supervisor = Supervisor::new(
        Arc::new(ProxyRegistry::new(Store::memory())),
        connector.clone(),
        test_settings(),
    );
    (supervisor, connector)
}

pub fn test_supervisor() -> (Supervisor, Arc<FakeConnector>) {
    supervisor_with(FakeConnector::default())
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
