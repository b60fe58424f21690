//! Client for the frpc admin web server.

use crate::error::FrpcError;
use crate::types::{AdminCredentials, StatusReport, LOOPBACK};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Authenticated client for frpc's local admin API.
#[derive(Clone)]
pub struct AdminClient {
    client: Client,
    base_url: String,
    credentials: AdminCredentials,
}

impl AdminClient {
    /// Create a new admin client.
    pub fn new(
        base_url: impl Into<String>,
        credentials: AdminCredentials,
        timeout: Duration,
    ) -> Result<Self, FrpcError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
        })
    }

    /// Admin client for an frpc instance listening on a loopback port.
    pub fn for_port(
        port: u16,
        credentials: AdminCredentials,
        timeout: Duration,
    ) -> Result<Self, FrpcError> {
        Self::new(format!("http://{}:{}", LOOPBACK, port), credentials, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch live per-proxy status.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn status(&self) -> Result<StatusReport, FrpcError> {
        let response = self
            .authorized(self.client.get(format!("{}/api/status", self.base_url)))
            .send()
            .await?;
        let response = Self::check(response).await?;

        let body = response.bytes().await?;
        let report: StatusReport = serde_json::from_slice(&body)?;
        debug!(proxies = report.tcp.len(), "Fetched proxy status");
        Ok(report)
    }

    /// Ask frpc to re-read its configuration file.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn reload(&self) -> Result<(), FrpcError> {
        let response = self
            .authorized(self.client.get(format!("{}/api/reload", self.base_url)))
            .send()
            .await?;
        Self::check(response).await?;

        debug!("frpc configuration reloaded");
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(
            &self.credentials.user,
            Some(self.credentials.password.expose_secret()),
        )
    }

    async fn check(response: Response) -> Result<Response, FrpcError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %body, "frpc admin request failed");
        Err(FrpcError::Admin { status, body })
    }
}
