//! Claim and credential rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{round_units, Money};
use crate::error::GrantError;
use crate::promotion::Promotion;
use crate::types::{ClaimId, PromotionId, WalletId};

use bigdecimal::{ToPrimitive, Zero};

/// A wallet's stake on one promotion. At most one claim exists per
/// (promotion, wallet).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub promotion_id: PromotionId,
    pub wallet_id: WalletId,
    /// Per-wallet amount for `ads` (pre-registered), copied from the
    /// promotion for `ugp`.
    #[serde(with = "crate::decimal::serde_str")]
    pub approximate_value: Money,
    #[serde(with = "crate::decimal::serde_str")]
    pub bonus: Money,
    pub redeemed: bool,
    /// Set when the claim was settled outside this system.
    pub legacy_claimed: bool,
    pub drained: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub drained_at: Option<DateTime<Utc>>,
}

impl Claim {
    /// How many blinded credentials this claim is exchanged for:
    /// round(value × suggestions_per_grant / promotion_value), never below 1.
    ///
    /// Fails when the promotion's value is zero (the ratio is undefined).
    pub fn suggestions_needed(&self, promotion: &Promotion) -> Result<u64, GrantError> {
        if promotion.approximate_value.is_zero() {
            return Err(GrantError::InvalidSuggestionCount);
        }
        let ratio = &self.approximate_value * Money::from(promotion.suggestions_per_grant)
            / &promotion.approximate_value;
        let rounded = round_units(&ratio)
            .to_u64()
            .ok_or(GrantError::InvalidSuggestionCount)?;
        Ok(rounded.max(1))
    }
}

/// The blinded-credential payload for one claim, 1:1 with [`Claim`].
/// `signed_creds` stays null until the signing worker hears back from the
/// issuer; once set it is never unset and always matches `blinded_creds`
/// in length.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimCreds {
    pub claim_id: ClaimId,
    pub issuer_id: Uuid,
    pub blinded_creds: Vec<String>,
    pub signed_creds: Option<Vec<String>>,
    pub batch_proof: Option<String>,
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimCreds {
    pub fn signed(&self) -> bool {
        self.signed_creds.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::money;
    use crate::types::PromotionType;
    use chrono::Duration;

    fn ads_promotion(value: &str, suggestions_per_grant: u64) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: PromotionId::random(),
            created_at: now,
            expires_at: now + Duration::days(90),
            kind: PromotionType::Ads,
            platform: String::new(),
            approximate_value: money(value),
            suggestions_per_grant,
            remaining_grants: 0,
            active: true,
            public_keys: vec![],
            claimable_until: None,
        }
    }

    fn claim_worth(value: &str, promotion: &Promotion) -> Claim {
        let now = Utc::now();
        Claim {
            id: ClaimId::random(),
            promotion_id: promotion.id,
            wallet_id: WalletId::random(),
            approximate_value: money(value),
            bonus: money("0"),
            redeemed: false,
            legacy_claimed: false,
            drained: false,
            created_at: now,
            updated_at: now,
            redeemed_at: None,
            drained_at: None,
        }
    }

    #[test]
    fn suggestions_needed_rounds_the_ratio() {
        // round(30 × 2 / 25) = round(2.4) = 2
        let p = ads_promotion("25", 2);
        let c = claim_worth("30", &p);
        assert_eq!(c.suggestions_needed(&p).unwrap(), 2);
    }

    #[test]
    fn suggestions_needed_clamps_to_one() {
        // A claim below one credential's value still needs one credential.
        let p = ads_promotion("25", 100);
        let c = claim_worth("0.05", &p);
        assert_eq!(c.suggestions_needed(&p).unwrap(), 1);
    }

    #[test]
    fn suggestions_needed_rejects_zero_value_promotion() {
        let p = ads_promotion("0", 2);
        let c = claim_worth("30", &p);
        assert!(matches!(
            c.suggestions_needed(&p),
            Err(GrantError::InvalidSuggestionCount)
        ));
    }
}
