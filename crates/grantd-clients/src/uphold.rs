//! Client for the Uphold hot-wallet transfer path.
//!
//! Transfers are committed immediately against the grant hot wallet's card.
//! The signing primitive for the card credentials lives outside this
//! service; the client carries a pre-authorized bearer token.

use async_trait::async_trait;
use grantd_core::decimal::Money;
use grantd_core::GrantError;
use grantd_engine::UpholdApi;
use serde::Serialize;
use tracing::info;

pub struct UpholdClient {
    base_url: String,
    card_id: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct Denomination<'a> {
    amount: &'a str,
    currency: &'a str,
}

#[derive(Serialize)]
struct TransactionRequest<'a> {
    denomination: Denomination<'a>,
    destination: &'a str,
    message: &'a str,
}

impl UpholdClient {
    pub fn new(base_url: &str, card_id: &str, access_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            card_id: card_id.to_string(),
            access_token: access_token.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl UpholdApi for UpholdClient {
    async fn transfer(
        &self,
        destination: &str,
        amount: &Money,
        transfer_id: &str,
    ) -> Result<(), GrantError> {
        let amount = amount.to_string();
        let resp = self
            .client
            .post(format!(
                "{}/v0/me/cards/{}/transactions?commit=true",
                self.base_url, self.card_id
            ))
            .bearer_auth(&self.access_token)
            .json(&TransactionRequest {
                denomination: Denomination {
                    amount: &amount,
                    currency: "BAT",
                },
                destination,
                message: transfer_id,
            })
            .send()
            .await
            .map_err(|e| GrantError::Custodian(format!("uphold transfer: {e}")))?;
        match resp.status() {
            s if s.is_success() => {
                info!(transfer_id, amount, "uphold transfer committed");
                Ok(())
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(GrantError::CustodianUnauthorized),
            s => Err(GrantError::Custodian(format!("uphold transfer: {s}"))),
        }
    }
}
