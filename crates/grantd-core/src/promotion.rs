//! Promotion and issuer rows.
//!
//! A promotion is an offer of reward with a finite pool of grants. Each
//! promotion is bound to one or more issuers (one per cohort) at the external
//! credential signer; the issuer's public key is what wallets later present
//! credentials under.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CREDENTIAL_VALUE, PROMOTION_CLAIM_WINDOW_MONTHS};
use crate::decimal::Money;
use crate::error::GrantError;
use crate::types::{PromotionId, PromotionType};

/// An offer of reward. `approximate_value` is the total pool for `ads`
/// promotions and the per-grant value for `ugp`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: PromotionType,
    /// Platform tag this promotion targets; empty means all platforms.
    pub platform: String,
    #[serde(with = "crate::decimal::serde_str")]
    pub approximate_value: Money,
    /// How many blinded credentials one grant is exchanged for.
    pub suggestions_per_grant: u64,
    pub remaining_grants: u64,
    pub active: bool,
    /// Issuer public keys registered for this promotion, in cohort order.
    pub public_keys: Vec<String>,
    /// Overrides the automatic claim window when set.
    pub claimable_until: Option<DateTime<Utc>>,
}

impl Promotion {
    /// Value of one credential under this promotion.
    pub fn credential_value(&self) -> Money {
        &self.approximate_value / Money::from(self.suggestions_per_grant)
    }

    /// The credential value is fixed protocol-wide; a promotion that divides
    /// to anything else is corrupt and must not be claimed or drained.
    pub fn check_credential_value(&self) -> Result<(), GrantError> {
        let value = self.credential_value();
        if value != *CREDENTIAL_VALUE {
            return Err(GrantError::CredentialValueDrift {
                promotion_id: self.id.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// End of the claim window: `claimable_until` when set, otherwise
    /// three months after creation.
    fn claim_window_end(&self) -> DateTime<Utc> {
        self.claimable_until.unwrap_or_else(|| {
            self.created_at + Months::new(PROMOTION_CLAIM_WINDOW_MONTHS)
        })
    }

    /// Whether a wallet may claim this promotion right now.
    ///
    /// `override_auto_expiry` is set when the requesting claim was settled
    /// legacy-side; such claims bypass the window but never a hard expiry.
    pub fn claimable(&self, override_auto_expiry: bool, now: DateTime<Utc>) -> bool {
        if self.expired(now) {
            return false;
        }
        override_auto_expiry || now < self.claim_window_end()
    }
}

// ── Issuer ───────────────────────────────────────────────────────────────────

/// Binds one promotion to one cohort and one signing public key at the
/// external issuer. Exactly one issuer exists per (promotion, cohort).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Issuer {
    pub id: Uuid,
    pub promotion_id: PromotionId,
    pub cohort: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl Issuer {
    /// Name under which the external issuer knows this (promotion, cohort).
    pub fn name(&self) -> String {
        format!("{}:{}", self.promotion_id, self.cohort)
    }
}
