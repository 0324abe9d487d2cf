//! Wire DTOs.

use chrono::{DateTime, Utc};
use grantd_core::{ClaimId, CredentialBinding, Promotion, PromotionType, WalletId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromotionRequest {
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub num_grants: u64,
    /// Decimal string; per grant for ugp, pool total for ads.
    pub value: String,
    pub suggestions_per_grant: u64,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub platform: String,
    pub approximate_value: String,
    pub suggestions_per_grant: u64,
    pub available: bool,
}

impl PromotionView {
    pub fn from_promotion(p: &Promotion, available: bool) -> Self {
        Self {
            id: p.id.to_string(),
            kind: p.kind,
            created_at: p.created_at,
            expires_at: p.expires_at,
            platform: p.platform.clone(),
            approximate_value: p.approximate_value.to_string(),
            suggestions_per_grant: p.suggestions_per_grant,
            available,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct PromotionsResponse {
    pub promotions: Vec<PromotionView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromotionsQuery {
    pub payment_id: Option<WalletId>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub migrate: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub payment_id: WalletId,
    pub blinded_creds: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub claim_id: ClaimId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCredsResponse {
    pub signed_creds: Vec<String>,
    pub batch_proof: String,
    pub public_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub payment_id: WalletId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub amount: String,
    pub last_claim: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub credentials: Vec<CredentialBinding>,
    /// Base64 of the suggestion document.
    pub suggestion_text: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    pub id: Uuid,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainRequest {
    pub payment_id: WalletId,
    pub credentials: Vec<CredentialBinding>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainResponse {
    pub drain_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainRetryRequest {
    pub payment_id: WalletId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainRetryResponse {
    pub updated: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BapReportRequest {
    pub amount: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatLossRequest {
    pub amount: String,
    #[serde(default)]
    pub platform: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClobberedClaimsRequest {
    pub claim_ids: Vec<ClaimId>,
}
