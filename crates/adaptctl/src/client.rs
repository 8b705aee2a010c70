//! HTTP client for the adaptation daemon.

use adapt_common::{AdaptationEvent, ExportRecord, Policy};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Daemon health summary, mirroring the /v1/health response.
#[derive(Debug, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub policies: usize,
}

pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self
            .http
            .get(self.url("/v1/health"))
            .send()
            .await
            .context("Daemon unreachable")?;
        Ok(response.json().await?)
    }

    pub async fn register_policy(&self, policy: &Policy) -> Result<()> {
        let response = self
            .http
            .post(self.url("/v1/policy"))
            .json(policy)
            .send()
            .await
            .context("Daemon unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Policy rejected ({}): {}", status, body);
        }
        Ok(())
    }

    pub async fn events(&self, limit: usize) -> Result<Vec<AdaptationEvent>> {
        let response = self
            .http
            .get(self.url(&format!("/v1/events?limit={}", limit)))
            .send()
            .await
            .context("Daemon unreachable")?;
        Ok(response.json().await?)
    }

    pub async fn knowledge(&self, policy_id: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(self.url(&format!("/v1/knowledge/{}", policy_id)))
            .send()
            .await
            .context("Daemon unreachable")?;

        if !response.status().is_success() {
            bail!("Policy '{}' not found", policy_id);
        }
        Ok(response.json().await?)
    }

    pub async fn export(
        &self,
        policy_id: &str,
        instance_id: &str,
        limit: usize,
    ) -> Result<Vec<ExportRecord>> {
        let response = self
            .http
            .get(self.url(&format!(
                "/v1/knowledge/{}/{}/export?limit={}",
                policy_id, instance_id, limit
            )))
            .send()
            .await
            .context("Daemon unreachable")?;
        Ok(response.json().await?)
    }
}
