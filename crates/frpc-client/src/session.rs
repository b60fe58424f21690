//! Tunnel session seams.

use crate::error::FrpcError;
use crate::types::{ActiveSet, AdminCredentials, SessionConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Creates tunnel sessions.
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Prepare a session to `config.server_addr` carrying `initial` proxies.
    ///
    /// Nothing is dialed until [`TunnelSession::run`] is called.
    async fn create(
        &self,
        config: &SessionConfig,
        initial: &ActiveSet,
        credentials: &AdminCredentials,
    ) -> Result<Arc<dyn TunnelSession>, FrpcError>;
}

/// A single connection to the broker.
#[async_trait]
pub trait TunnelSession: Send + Sync {
    /// Run the session until it ends.
    ///
    /// Resolves with an error when the broker rejects or drops the session,
    /// and with `Ok` once [`close`](TunnelSession::close) has been called.
    async fn run(&self) -> Result<(), FrpcError>;

    /// Stop the session. Returns immediately; `run` unwinds on its own.
    fn close(&self);

    /// Replace the proxy set carried by the running session.
    async fn reload(&self, active: &ActiveSet) -> Result<(), FrpcError>;
}
