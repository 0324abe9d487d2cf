//! The claim engine.

use bigdecimal::ToPrimitive;
use chrono::Utc;
use grantd_core::{
    ClaimId, GrantError, Promotion, PromotionId, PromotionType, WalletId, DEFAULT_COHORT,
};
use grantd_store::claims::ClaimSummary;
use tracing::{debug, info};

use crate::metrics::ClaimLabels;
use crate::service::Service;

/// Signed credentials as handed back to the wallet.
#[derive(Clone, Debug)]
pub struct ClaimCredsView {
    pub signed_creds: Vec<String>,
    pub batch_proof: String,
    pub public_key: String,
}

impl Service {
    /// Exchange a batch of blinded credentials for a claim on `promotion_id`.
    ///
    /// The checks run in a fixed order so every failure mode has one
    /// well-defined outcome; replays with identical credentials short-circuit
    /// to the original claim id with no side effect.
    pub async fn claim_promotion_for_wallet(
        &self,
        promotion_id: PromotionId,
        wallet_id: WalletId,
        blinded_creds: Vec<String>,
    ) -> Result<ClaimId, GrantError> {
        let promotion = self
            .store
            .get_promotion(&promotion_id)?
            .ok_or(GrantError::PromotionNotFound)?;

        self.store
            .get_wallet(&wallet_id)
            .map_err(|e| GrantError::WalletLookup(e.to_string()))?
            .ok_or_else(|| GrantError::WalletLookup(wallet_id.to_string()))?;

        let existing = self.store.find_claim(&promotion_id, &wallet_id)?;
        let override_auto_expiry = existing.as_ref().is_some_and(|c| c.legacy_claimed);

        if !promotion.claimable(override_auto_expiry, Utc::now()) {
            return Err(GrantError::PromotionGone);
        }

        if let Some(claim) = existing.as_ref().filter(|c| c.redeemed) {
            // A redeemed claim with no credential row is corruption, not a
            // user error.
            let creds = self
                .store
                .get_claim_creds(&claim.id)?
                .ok_or_else(|| GrantError::MissingClaimCreds(claim.id.to_string()))?;
            if creds.blinded_creds == blinded_creds {
                debug!(claim = %claim.id, "claim replayed with identical credentials");
                return Ok(claim.id);
            }
            return Err(GrantError::BlindedCredsMismatch);
        }

        if !promotion.active {
            return Err(GrantError::PromotionDisabled);
        }

        if !existing.as_ref().is_some_and(|c| c.legacy_claimed) {
            let reputable = self
                .reputation
                .is_wallet_reputable(wallet_id, &promotion.platform)
                .await?;
            if !reputable {
                return Err(GrantError::NotReputable);
            }
        }

        let issuer = self.ensure_issuer(&promotion, DEFAULT_COHORT).await?;

        let suggestions_needed = match promotion.kind {
            PromotionType::Ads => existing
                .as_ref()
                .ok_or(GrantError::MissingPreRegisteredClaim)?
                .suggestions_needed(&promotion)?,
            PromotionType::Ugp => promotion.suggestions_per_grant,
        };
        if blinded_creds.len() as u64 != suggestions_needed {
            return Err(GrantError::InvalidBlindedCount {
                expected: suggestions_needed,
                got: blinded_creds.len() as u64,
            });
        }

        let claim = self
            .store
            .claim_for_wallet(&promotion, &issuer, wallet_id, blinded_creds)?;

        let labels = ClaimLabels {
            platform: promotion.platform.clone(),
            kind: promotion.kind.to_string(),
            legacy: claim.legacy_claimed.to_string(),
        };
        self.metrics.grants_claimed.get_or_create(&labels).inc();
        self.metrics
            .value_claimed
            .get_or_create(&labels)
            .inc_by(claim.approximate_value.to_f64().unwrap_or(0.0));

        info!(claim = %claim.id, promotion = %promotion_id, "grant claimed");
        self.scheduler.kick(crate::jobs::SIGN_CLAIMS);
        Ok(claim.id)
    }

    /// Signed credentials for a claim, or `None` while the signing worker
    /// has not come around yet.
    pub fn signed_creds_for_claim(
        &self,
        promotion_id: PromotionId,
        claim_id: ClaimId,
    ) -> Result<Option<ClaimCredsView>, GrantError> {
        let claim = self
            .store
            .get_claim(&claim_id)?
            .filter(|c| c.promotion_id == promotion_id)
            .ok_or(GrantError::ClaimNotFound)?;
        let creds = self
            .store
            .get_claim_creds(&claim.id)?
            .ok_or_else(|| GrantError::MissingClaimCreds(claim.id.to_string()))?;
        let (Some(signed_creds), Some(batch_proof), Some(public_key)) =
            (creds.signed_creds, creds.batch_proof, creds.public_key)
        else {
            return Ok(None);
        };
        Ok(Some(ClaimCredsView {
            signed_creds,
            batch_proof,
            public_key,
        }))
    }

    /// Promotions the wallet can act on right now.
    pub fn available_promotions(
        &self,
        wallet_id: WalletId,
        platform: &str,
        migrate: bool,
    ) -> Result<Vec<Promotion>, GrantError> {
        self.store
            .available_promotions(&wallet_id, platform, migrate, Utc::now())
    }

    /// Aggregated earnings for a wallet, excluding the configured transfer
    /// promotions.
    pub fn wallet_summary(
        &self,
        wallet_id: WalletId,
        kind: PromotionType,
    ) -> Result<Option<ClaimSummary>, GrantError> {
        self.store
            .claim_summary(&wallet_id, kind, &self.config.transfer_promotion_exclusions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{blinded, seed_wallet, TestService};
    use chrono::{Duration, Months};
    use grantd_core::decimal::money;

    #[tokio::test]
    async fn full_ugp_claim_flow() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, "osx".into(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        let available = t
            .service
            .available_promotions(wallet, "osx", false)
            .unwrap();
        assert_eq!(available.len(), 1);

        let claim_id = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(60))
            .await
            .unwrap();

        let fresh = t.service.store.get_promotion(&promotion.id).unwrap().unwrap();
        assert_eq!(fresh.remaining_grants, 1);
        // Issuer was created on demand and its key recorded.
        assert_eq!(fresh.public_keys.len(), 1);

        // Not signed yet.
        assert!(t
            .service
            .signed_creds_for_claim(promotion.id, claim_id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn replay_with_identical_creds_is_idempotent() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);
        let creds = blinded(60);

        let first = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, creds.clone())
            .await
            .unwrap();
        let second = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, creds)
            .await
            .unwrap();
        assert_eq!(first, second);
        // No extra grant consumed.
        assert_eq!(
            t.service.store.get_promotion(&promotion.id).unwrap().unwrap().remaining_grants,
            1
        );

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(60).into_iter().rev().collect())
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::BlindedCredsMismatch));
    }

    #[tokio::test]
    async fn wrong_blinded_count_is_rejected() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GrantError::InvalidBlindedCount { expected: 60, got: 10 }
        ));
    }

    #[tokio::test]
    async fn ads_claim_uses_preregistered_value() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ads, 0, money("25"), 100, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        // round(30 × 100 / 25) = 120 credentials expected.
        t.service
            .store
            .create_claim(promotion.id, wallet, money("30"), money("0"), false)
            .unwrap();

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::InvalidBlindedCount { expected: 120, .. }));

        t.service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(120))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ads_claim_without_preregistration_fails() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ads, 0, money("25"), 100, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::MissingPreRegisteredClaim));
    }

    #[tokio::test]
    async fn inactive_promotion_is_disabled() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        let wallet = seed_wallet(&t.service, None);

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::PromotionDisabled));
    }

    #[tokio::test]
    async fn expired_window_is_gone_unless_legacy() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        let mut stale = t.service.store.get_promotion(&promotion.id).unwrap().unwrap();
        stale.created_at = Utc::now() - Months::new(3);
        stale.expires_at = Utc::now() + Duration::days(30);
        t.service.store.put_promotion(&stale).unwrap();

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::PromotionGone));
    }

    #[tokio::test]
    async fn unreputable_wallet_is_rejected() {
        let t = TestService::new();
        t.reputation.set_reputable(false);
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, wallet, blinded(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::NotReputable));
    }

    #[tokio::test]
    async fn exhausted_pool_reports_no_grants_left() {
        let t = TestService::new();
        let promotion = t
            .service
            .create_promotion(PromotionType::Ugp, 1, money("15"), 60, String::new(), None)
            .unwrap();
        t.service.activate_promotion(&promotion.id).unwrap();
        let w1 = seed_wallet(&t.service, None);
        let w2 = seed_wallet(&t.service, None);

        t.service
            .claim_promotion_for_wallet(promotion.id, w1, blinded(60))
            .await
            .unwrap();
        let err = t
            .service
            .claim_promotion_for_wallet(promotion.id, w2, blinded(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::NoGrantsLeft));
    }

    #[tokio::test]
    async fn summary_excludes_configured_transfer_promotions() {
        let mut t = TestService::new();
        let keep = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        let excluded = t
            .service
            .create_promotion(PromotionType::Ugp, 2, money("15"), 60, String::new(), None)
            .unwrap();
        t.set_transfer_exclusions(vec![excluded.id]);
        t.service.activate_promotion(&keep.id).unwrap();
        t.service.activate_promotion(&excluded.id).unwrap();
        let wallet = seed_wallet(&t.service, None);

        t.service
            .claim_promotion_for_wallet(keep.id, wallet, blinded(60))
            .await
            .unwrap();
        t.service
            .claim_promotion_for_wallet(excluded.id, wallet, blinded(60))
            .await
            .unwrap();

        let summary = t
            .service
            .wallet_summary(wallet, PromotionType::Ugp)
            .unwrap()
            .unwrap();
        assert_eq!(summary.amount, money("15"));
    }
}
