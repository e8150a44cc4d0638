//! Outbound status sync to the external market registry.
//!
//! Sync calls are fire-and-forget: a failure is logged by the caller and
//! never rolls back locally applied ledger state.

use crate::domain::MarketId;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Registry returned status {0}")]
    Status(u16),
}

/// Client for the registry's status-sync endpoint.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Report a market as resolved with its final value.
    pub async fn sync_market_resolved(
        &self,
        market_id: &MarketId,
        resolved_value: i64,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v1/markets/{}/status", self.base_url, market_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "status": "resolved",
                "resolvedValue": resolved_value,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
