//! Client for the reputation oracle.

use async_trait::async_trait;
use grantd_core::decimal::Money;
use grantd_core::{GrantError, PromotionId, WalletId};
use grantd_engine::{DrainReputability, ReputationOracle};
use serde::Deserialize;

pub struct ReputationClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReputableResponse {
    is_reputable: bool,
    #[serde(default)]
    cohorts: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnPlatformResponse {
    is_on_platform: bool,
}

fn oracle_err(context: &str, e: impl std::fmt::Display) -> GrantError {
    GrantError::Reputation(format!("{context}: {e}"))
}

impl ReputationClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: String,
        query: &[(&str, String)],
    ) -> Result<T, GrantError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| oracle_err("calling reputation oracle", e))?;
        if !resp.status().is_success() {
            return Err(oracle_err("reputation oracle", resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| oracle_err("parsing reputation response", e))
    }
}

#[async_trait]
impl ReputationOracle for ReputationClient {
    async fn is_wallet_reputable(
        &self,
        wallet_id: WalletId,
        platform: &str,
    ) -> Result<bool, GrantError> {
        let query = if platform.is_empty() {
            vec![]
        } else {
            vec![("platform", platform.to_string())]
        };
        let body: ReputableResponse = self
            .get_json(format!("/v1/reputation/{wallet_id}"), &query)
            .await?;
        Ok(body.is_reputable)
    }

    async fn is_wallet_on_platform(
        &self,
        wallet_id: WalletId,
        platform: &str,
    ) -> Result<bool, GrantError> {
        let body: OnPlatformResponse = self
            .get_json(
                format!("/v1/reputation/{wallet_id}/platform/{platform}"),
                &[],
            )
            .await?;
        Ok(body.is_on_platform)
    }

    async fn is_wallet_ads_reputable(&self, wallet_id: WalletId) -> Result<bool, GrantError> {
        let body: ReputableResponse = self
            .get_json(format!("/v1/reputation/{wallet_id}/ads"), &[])
            .await?;
        Ok(body.is_reputable)
    }

    async fn is_drain_reputable(
        &self,
        wallet_id: WalletId,
        promotion_id: PromotionId,
        withdrawn_so_far: &Money,
    ) -> Result<DrainReputability, GrantError> {
        let body: ReputableResponse = self
            .get_json(
                format!("/v1/reputation/{wallet_id}/drain"),
                &[
                    ("promotionId", promotion_id.to_string()),
                    ("withdrawalAmount", withdrawn_so_far.to_string()),
                ],
            )
            .await?;
        if body.cohorts.iter().any(|c| c == "withdrawal-limits") {
            return Ok(DrainReputability::WithdrawalLimits);
        }
        if body.is_reputable {
            Ok(DrainReputability::Reputable)
        } else {
            Ok(DrainReputability::NotReputable)
        }
    }
}
