//! Client for Bitflyer bulk payouts.
//!
//! Auth tokens expire server-side; the client exposes an explicit refresh so
//! the batch worker can retry an unauthorized call exactly once.

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use grantd_core::decimal::Money;
use grantd_core::GrantError;
use grantd_engine::custodian::{BitflyerApi, BitflyerWithdrawResult, BitflyerWithdrawal};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

pub struct BitflyerClient {
    base_url: String,
    client_id: String,
    client_secret: String,
    source_from: String,
    token: RwLock<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct QuoteResponse {
    // Decimal carried as a string so the rate never passes through a float.
    price: String,
}

#[derive(Serialize)]
struct WithdrawalRequest<'a> {
    currency_code: &'a str,
    amount: String,
    deposit_id: &'a str,
    transfer_id: &'a str,
    source_from: &'a str,
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    dry_run: bool,
    withdrawals: Vec<WithdrawalRequest<'a>>,
}

#[derive(Deserialize)]
struct BulkResponseEntry {
    transfer_id: String,
    transfer_status: String,
}

#[derive(Deserialize)]
struct BulkResponse {
    withdrawals: Vec<BulkResponseEntry>,
}

fn custodian_err(context: &str, e: impl std::fmt::Display) -> GrantError {
    GrantError::Custodian(format!("{context}: {e}"))
}

impl BitflyerClient {
    pub fn new(base_url: &str, client_id: &str, client_secret: &str, source_from: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            source_from: source_from.to_string(),
            token: RwLock::new(String::new()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BitflyerApi for BitflyerClient {
    async fn fetch_quote(&self) -> Result<Money, GrantError> {
        let token = self.token.read().await.clone();
        let resp = self
            .client
            .get(format!("{}/api/link/v1/getprice", self.base_url))
            .bearer_auth(token)
            .query(&[("product_code", "BAT_JPY")])
            .send()
            .await
            .map_err(|e| custodian_err("bitflyer quote", e))?;
        match resp.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED => return Err(GrantError::CustodianUnauthorized),
            s => return Err(custodian_err("bitflyer quote", s)),
        }
        let body: QuoteResponse = resp
            .json()
            .await
            .map_err(|e| custodian_err("parsing bitflyer quote", e))?;
        BigDecimal::from_str(&body.price)
            .map_err(|e| custodian_err("parsing bitflyer price", e))
    }

    async fn refresh_token(&self) -> Result<(), GrantError> {
        let resp = self
            .client
            .post(format!("{}/api/link/v1/token", self.base_url))
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await
            .map_err(|e| custodian_err("bitflyer token refresh", e))?;
        if !resp.status().is_success() {
            return Err(custodian_err("bitflyer token refresh", resp.status()));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| custodian_err("parsing bitflyer token", e))?;
        *self.token.write().await = body.access_token;
        info!("bitflyer token refreshed");
        Ok(())
    }

    async fn upload_bulk_payout(
        &self,
        withdrawals: &[BitflyerWithdrawal],
    ) -> Result<Vec<BitflyerWithdrawResult>, GrantError> {
        let token = self.token.read().await.clone();
        let request = BulkRequest {
            dry_run: false,
            withdrawals: withdrawals
                .iter()
                .map(|w| WithdrawalRequest {
                    currency_code: "BAT",
                    amount: w.amount.to_string(),
                    deposit_id: &w.deposit_id,
                    transfer_id: &w.transfer_id,
                    source_from: &self.source_from,
                })
                .collect(),
        };
        let resp = self
            .client
            .post(format!(
                "{}/api/link/v1/coin/withdraw-to-deposit-id/bulk-request",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| custodian_err("bitflyer bulk payout", e))?;
        match resp.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED => return Err(GrantError::CustodianUnauthorized),
            s => return Err(custodian_err("bitflyer bulk payout", s)),
        }
        let body: BulkResponse = resp
            .json()
            .await
            .map_err(|e| custodian_err("parsing bitflyer bulk response", e))?;
        Ok(body
            .withdrawals
            .into_iter()
            .map(|w| BitflyerWithdrawResult {
                transfer_id: w.transfer_id,
                status: w.transfer_status,
            })
            .collect())
    }
}
