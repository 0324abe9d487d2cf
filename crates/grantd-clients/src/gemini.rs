//! Client for Gemini bulk payouts.
//!
//! Requests carry the JSON document base64-encoded in the provider's payload
//! envelope. Settlement is asynchronous: the caller polls by transfer
//! reference until the line reaches a terminal status.

use async_trait::async_trait;
use base64::Engine;
use grantd_core::GrantError;
use grantd_engine::custodian::{GeminiApi, GeminiPayout, GeminiTxStatus};
use serde::{Deserialize, Serialize};

pub struct GeminiClient {
    base_url: String,
    client_id: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct BulkPayoutEntry<'a> {
    tx_ref: &'a str,
    amount: String,
    currency: &'a str,
    destination: &'a str,
}

#[derive(Serialize)]
struct BulkPayoutDocument<'a> {
    payouts: Vec<BulkPayoutEntry<'a>>,
}

#[derive(Serialize)]
struct Envelope {
    payload: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

fn custodian_err(context: &str, e: impl std::fmt::Display) -> GrantError {
    GrantError::Custodian(format!("{context}: {e}"))
}

impl GeminiClient {
    pub fn new(base_url: &str, client_id: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GeminiApi for GeminiClient {
    async fn upload_payout(&self, payout: &GeminiPayout) -> Result<(), GrantError> {
        let document = BulkPayoutDocument {
            payouts: vec![BulkPayoutEntry {
                tx_ref: &payout.tx_ref,
                amount: payout.amount.to_string(),
                currency: "BAT",
                destination: &payout.destination,
            }],
        };
        let json = serde_json::to_vec(&document)
            .map_err(|e| GrantError::Serialization(e.to_string()))?;
        let envelope = Envelope {
            payload: base64::engine::general_purpose::STANDARD.encode(json),
        };
        let resp = self
            .client
            .post(format!("{}/v1/payments/bulkPay", self.base_url))
            .header("X-GEMINI-APIKEY", &self.api_key)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| custodian_err("gemini bulk payout", e))?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED => Err(GrantError::CustodianUnauthorized),
            s => Err(custodian_err("gemini bulk payout", s)),
        }
    }

    async fn check_status(&self, tx_ref: &str) -> Result<GeminiTxStatus, GrantError> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/payments/{}/transaction/{tx_ref}",
                self.base_url, self.client_id
            ))
            .header("X-GEMINI-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| custodian_err("gemini status", e))?;
        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => return Ok(GeminiTxStatus::NotFound),
            reqwest::StatusCode::UNAUTHORIZED => return Err(GrantError::CustodianUnauthorized),
            s if !s.is_success() => return Err(custodian_err("gemini status", s)),
            _ => {}
        }
        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| custodian_err("parsing gemini status", e))?;
        Ok(match body.status.as_str() {
            "Completed" => GeminiTxStatus::Completed,
            "Pending" => GeminiTxStatus::Pending,
            "Processing" => GeminiTxStatus::Processing,
            "Failed" => GeminiTxStatus::Failed(
                body.reason.unwrap_or_else(|| "gemini_failed".to_string()),
            ),
            other => {
                return Err(custodian_err("gemini status", format!("unknown status {other}")))
            }
        })
    }
}
