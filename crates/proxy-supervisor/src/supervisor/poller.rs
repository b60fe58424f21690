//! Periodic status merge from the tunnel client's admin API.

use super::{Phase, Supervisor};
use crate::error::SupervisorError;
use frpc_client::AdminClient;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls live proxy status for one tunnel session.
pub struct StatusPoller {
    supervisor: Supervisor,
    admin: AdminClient,
    interval: Duration,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn new(
        supervisor: Supervisor,
        admin: AdminClient,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisor,
            admin,
            interval,
            cancel,
        }
    }

    /// Fetch status once and merge it. Returns the number of definitions
    /// whose runtime view changed.
    pub async fn poll_once(&self) -> Result<usize, SupervisorError> {
        let report = self.admin.status().await?;
        self.supervisor.merge_status(&report, &self.cancel).await
    }

    /// Poll until cancelled or the session leaves the connected phase.
    /// Failed polls are logged and retried on the next tick.
    pub async fn run(self) {
        info!(
            admin = %self.admin.base_url(),
            interval = ?self.interval,
            "Starting status poller"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.supervisor.phase() != Phase::Connected {
                break;
            }

            match self.poll_once().await {
                Ok(changed) => debug!(changed, "Status merged"),
                Err(e) => warn!("Status poll failed: {}", e),
            }
        }

        info!(admin = %self.admin.base_url(), "Status poller stopped");
    }
}

/// Spawn a status poller as a background task.
pub fn spawn_poller(
    supervisor: Supervisor,
    admin: AdminClient,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let poller = StatusPoller::new(supervisor, admin, interval, cancel);

    tokio::spawn(async move {
        poller.run().await;
    })
}
