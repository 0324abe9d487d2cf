//! Client for the blinded-credential issuer service.

use async_trait::async_trait;
use grantd_core::{GrantError, RedeemCredential};
use grantd_engine::{CredentialIssuer, SignedCreds};
use serde::{Deserialize, Serialize};

pub struct CbClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateIssuerRequest<'a> {
    name: &'a str,
    max_tokens: u64,
}

#[derive(Deserialize)]
struct IssuerResponse {
    public_key: String,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    blinded_tokens: &'a [String],
}

#[derive(Deserialize)]
struct SignResponse {
    signed_tokens: Vec<String>,
    batch_proof: String,
    public_key: String,
}

#[derive(Serialize)]
struct RedeemRequest<'a> {
    tokens: &'a [RedeemCredential],
    payload: &'a str,
}

fn issuer_err(context: &str, e: impl std::fmt::Display) -> GrantError {
    GrantError::Issuer(format!("{context}: {e}"))
}

impl CbClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for CbClient {
    async fn create_issuer(&self, name: &str, max_tokens: u64) -> Result<(), GrantError> {
        let resp = self
            .client
            .post(format!("{}/v1/issuer/", self.base_url))
            .json(&CreateIssuerRequest { name, max_tokens })
            .send()
            .await
            .map_err(|e| issuer_err("creating issuer", e))?;
        // The upstream create is idempotent; an existing issuer conflicts
        // harmlessly.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        Err(issuer_err("creating issuer", resp.status()))
    }

    async fn issuer_public_key(&self, name: &str) -> Result<String, GrantError> {
        let resp = self
            .client
            .get(format!("{}/v1/issuer/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| issuer_err("fetching issuer", e))?;
        if !resp.status().is_success() {
            return Err(issuer_err("fetching issuer", resp.status()));
        }
        let body: IssuerResponse = resp
            .json()
            .await
            .map_err(|e| issuer_err("parsing issuer response", e))?;
        Ok(body.public_key)
    }

    async fn sign_credentials(
        &self,
        issuer_name: &str,
        blinded_creds: &[String],
    ) -> Result<SignedCreds, GrantError> {
        let resp = self
            .client
            .post(format!("{}/v1/blindedToken/{issuer_name}", self.base_url))
            .json(&SignRequest {
                blinded_tokens: blinded_creds,
            })
            .send()
            .await
            .map_err(|e| issuer_err("signing credentials", e))?;
        if !resp.status().is_success() {
            return Err(issuer_err("signing credentials", resp.status()));
        }
        let body: SignResponse = resp
            .json()
            .await
            .map_err(|e| issuer_err("parsing sign response", e))?;
        Ok(SignedCreds {
            signed_creds: body.signed_tokens,
            batch_proof: body.batch_proof,
            public_key: body.public_key,
        })
    }

    async fn redeem_credentials(
        &self,
        credentials: &[RedeemCredential],
        payload: &str,
    ) -> Result<(), GrantError> {
        let resp = self
            .client
            .post(format!("{}/v1/blindedToken/bulk/redemption/", self.base_url))
            .json(&RedeemRequest {
                tokens: credentials,
                payload,
            })
            .send()
            .await
            .map_err(|e| issuer_err("redeeming credentials", e))?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            // Codified so the drain retry path can re-enter with redemption
            // skipped.
            reqwest::StatusCode::CONFLICT => Err(GrantError::DuplicateCredentialRedemption),
            s => Err(issuer_err("redeeming credentials", s)),
        }
    }
}
