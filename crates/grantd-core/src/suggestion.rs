//! Suggestion jobs and funding-source aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{PromotionId, PromotionType, RedeemCredential};

/// Per-issuer aggregate of the credentials drawn from one promotion during
/// one drain or suggestion call, keyed by the issuer public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundingSource {
    #[serde(rename = "type")]
    pub kind: PromotionType,
    pub promotion_id: PromotionId,
    pub cohort: String,
    #[serde(with = "crate::decimal::serde_str")]
    pub amount: Money,
    pub credentials: Vec<RedeemCredential>,
}

/// A user-directed redemption awaiting durable emission to the event bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestionJob {
    pub id: Uuid,
    pub credentials: Vec<RedeemCredential>,
    /// Base64 of the user-facing suggestion document.
    pub suggestion_text: String,
    /// The serialized event record, produced up front so emission is a pure
    /// replay and stays idempotent under at-least-once delivery.
    pub event_payload: Vec<u8>,
    pub erred: bool,
    pub errcode: Option<String>,
    pub created_at: DateTime<Utc>,
}
