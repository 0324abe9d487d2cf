//! Claim lifecycle operations.
//!
//! Everything here that mutates more than one row runs under the store's
//! write lock so the read-check-write span is atomic with respect to every
//! other mutation.

use chrono::{DateTime, Utc};
use grantd_core::decimal::Money;
use grantd_core::{
    Claim, ClaimCreds, ClaimId, GrantError, Issuer, Promotion, PromotionId, PromotionType,
    WalletId,
};

use crate::db::{storage_err, Store};

/// Which writer won a credential write-back.
#[derive(Debug, PartialEq, Eq)]
pub enum SigningOutcome {
    /// This call persisted the signed credentials.
    Written,
    /// An earlier writer already did; the row was left untouched.
    AlreadySigned,
}

/// Earnings aggregate for one wallet and promotion type.
#[derive(Debug, Clone)]
pub struct ClaimSummary {
    pub amount: Money,
    pub last_claim: DateTime<Utc>,
}

impl Store {
    fn claim_index_key(promotion_id: &PromotionId, wallet_id: &WalletId) -> Vec<u8> {
        let mut key = promotion_id.as_bytes().to_vec();
        key.extend_from_slice(wallet_id.as_bytes());
        key
    }

    pub fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>, GrantError> {
        Self::get_tree(&self.claims, id.as_bytes())
    }

    /// The unique claim for (promotion, wallet), if any.
    pub fn find_claim(
        &self,
        promotion_id: &PromotionId,
        wallet_id: &WalletId,
    ) -> Result<Option<Claim>, GrantError> {
        let key = Self::claim_index_key(promotion_id, wallet_id);
        match self.claim_index.get(&key).map_err(storage_err)? {
            Some(id_bytes) => {
                let id = ClaimId(uuid::Uuid::from_slice(&id_bytes).map_err(|e| {
                    GrantError::Serialization(format!("claim index value: {e}"))
                })?);
                self.get_claim(&id)
            }
            None => Ok(None),
        }
    }

    pub fn get_claim_creds(&self, id: &ClaimId) -> Result<Option<ClaimCreds>, GrantError> {
        Self::get_tree(&self.claim_creds, id.as_bytes())
    }

    fn put_claim_indexed(&self, claim: &Claim) -> Result<(), GrantError> {
        Self::put_tree(&self.claims, claim.id.as_bytes(), claim)?;
        let key = Self::claim_index_key(&claim.promotion_id, &claim.wallet_id);
        self.claim_index
            .insert(key, claim.id.as_bytes().as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Create an unredeemed claim ahead of the wallet calling in (the `ads`
    /// pathway, written by an external campaign system) or a legacy-flagged
    /// claim (the mint pathway). Enforces (promotion, wallet) uniqueness.
    pub fn create_claim(
        &self,
        promotion_id: PromotionId,
        wallet_id: WalletId,
        value: Money,
        bonus: Money,
        legacy_claimed: bool,
    ) -> Result<Claim, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.find_claim(&promotion_id, &wallet_id)?.is_some() {
            return Err(GrantError::ClaimAlreadyExists);
        }
        let now = Utc::now();
        let claim = Claim {
            id: ClaimId::random(),
            promotion_id,
            wallet_id,
            approximate_value: value,
            bonus,
            redeemed: false,
            legacy_claimed,
            drained: false,
            created_at: now,
            updated_at: now,
            redeemed_at: None,
            drained_at: None,
        };
        self.put_claim_indexed(&claim)?;
        Ok(claim)
    }

    /// The atomic claim operation.
    ///
    /// For `ugp`, decrements the grant pool (failing when empty or inactive)
    /// and creates the claim; for `ads`, redeems the wallet's pre-registered
    /// claim. Either way the blinded credentials are stored in the same
    /// critical section, so a redeemed claim always has its credential row.
    pub fn claim_for_wallet(
        &self,
        promotion: &Promotion,
        issuer: &Issuer,
        wallet_id: WalletId,
        blinded_creds: Vec<String>,
    ) -> Result<Claim, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let claim = match promotion.kind {
            PromotionType::Ugp => {
                // Re-read the pool inside the lock; the caller's copy may be stale.
                let mut fresh = self
                    .get_promotion(&promotion.id)?
                    .ok_or(GrantError::PromotionNotFound)?;
                if fresh.remaining_grants == 0 || !fresh.active {
                    return Err(GrantError::NoGrantsLeft);
                }
                if self.find_claim(&promotion.id, &wallet_id)?.is_some() {
                    return Err(GrantError::ClaimAlreadyExists);
                }
                fresh.remaining_grants -= 1;
                self.put_promotion(&fresh)?;
                Claim {
                    id: ClaimId::random(),
                    promotion_id: promotion.id,
                    wallet_id,
                    approximate_value: fresh.approximate_value.clone(),
                    bonus: Money::from(0),
                    redeemed: true,
                    legacy_claimed: false,
                    drained: false,
                    created_at: now,
                    updated_at: now,
                    redeemed_at: Some(now),
                    drained_at: None,
                }
            }
            PromotionType::Ads => {
                let mut claim = self
                    .find_claim(&promotion.id, &wallet_id)?
                    .ok_or(GrantError::MissingPreRegisteredClaim)?;
                if claim.redeemed {
                    return Err(GrantError::ClaimAlreadyExists);
                }
                claim.redeemed = true;
                claim.redeemed_at = Some(now);
                claim.updated_at = now;
                claim
            }
        };

        self.put_claim_indexed(&claim)?;
        let creds = ClaimCreds {
            claim_id: claim.id,
            issuer_id: issuer.id,
            blinded_creds,
            signed_creds: None,
            batch_proof: None,
            public_key: None,
            created_at: now,
            updated_at: now,
        };
        Self::put_tree(&self.claim_creds, claim.id.as_bytes(), &creds)?;
        Ok(claim)
    }

    // ── Signing ──────────────────────────────────────────────────────────────

    /// Lease the oldest credential row still waiting on the issuer.
    pub fn lease_next_unsigned_creds(
        &self,
    ) -> Result<Option<(ClaimCreds, crate::LeaseGuard)>, GrantError> {
        let mut pending: Vec<ClaimCreds> = Vec::new();
        for item in self.claim_creds.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let creds: ClaimCreds = crate::db::dec(&bytes)?;
            if !creds.signed() {
                pending.push(creds);
            }
        }
        pending.sort_by_key(|c| c.created_at);
        for creds in pending {
            let mut lease_key = b"sign/".to_vec();
            lease_key.extend_from_slice(creds.claim_id.as_bytes());
            if let Some(guard) = self.leases.acquire(lease_key) {
                return Ok(Some((creds, guard)));
            }
        }
        Ok(None)
    }

    /// Persist signed credentials. First writer wins: if the row is already
    /// populated this is a no-op reported as [`SigningOutcome::AlreadySigned`].
    pub fn finish_signing(
        &self,
        claim_id: &ClaimId,
        signed_creds: Vec<String>,
        batch_proof: String,
        public_key: String,
    ) -> Result<SigningOutcome, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut creds = self
            .get_claim_creds(claim_id)?
            .ok_or_else(|| GrantError::MissingClaimCreds(claim_id.to_string()))?;
        if creds.signed() {
            return Ok(SigningOutcome::AlreadySigned);
        }
        if signed_creds.len() != creds.blinded_creds.len() {
            return Err(GrantError::Serialization(format!(
                "issuer returned {} signed credentials for {} blinded",
                signed_creds.len(),
                creds.blinded_creds.len()
            )));
        }
        creds.signed_creds = Some(signed_creds);
        creds.batch_proof = Some(batch_proof);
        creds.public_key = Some(public_key);
        creds.updated_at = Utc::now();
        Self::put_tree(&self.claim_creds, claim_id.as_bytes(), &creds)?;
        Ok(SigningOutcome::Written)
    }

    // ── Read-side queries ────────────────────────────────────────────────────

    pub fn claims_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Claim>, GrantError> {
        let mut out = Vec::new();
        for item in self.claims.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let claim: Claim = crate::db::dec(&bytes)?;
            if claim.wallet_id == *wallet_id {
                out.push(claim);
            }
        }
        Ok(out)
    }

    /// Aggregated redeemed earnings for one wallet and promotion type,
    /// excluding the given promotions.
    pub fn claim_summary(
        &self,
        wallet_id: &WalletId,
        kind: PromotionType,
        excluded: &[PromotionId],
    ) -> Result<Option<ClaimSummary>, GrantError> {
        let mut amount = Money::from(0);
        let mut last_claim: Option<DateTime<Utc>> = None;
        for claim in self.claims_for_wallet(wallet_id)? {
            if !claim.redeemed || excluded.contains(&claim.promotion_id) {
                continue;
            }
            let promotion = self
                .get_promotion(&claim.promotion_id)?
                .ok_or(GrantError::PromotionNotFound)?;
            if promotion.kind != kind {
                continue;
            }
            amount += &claim.approximate_value;
            last_claim = Some(match last_claim {
                Some(t) => t.max(claim.created_at),
                None => claim.created_at,
            });
        }
        Ok(last_claim.map(|last_claim| ClaimSummary { amount, last_claim }))
    }

    /// Promotions a wallet can act on right now: platform-matched, claimable
    /// (honoring legacy overrides), not yet exchanged for credentials, and —
    /// for `ads` — pre-registered to this wallet.
    pub fn available_promotions(
        &self,
        wallet_id: &WalletId,
        platform: &str,
        migrate: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Promotion>, GrantError> {
        let mut out = Vec::new();
        for promotion in self.iter_promotions()? {
            if !promotion.active {
                continue;
            }
            if !promotion.platform.is_empty() && promotion.platform != platform {
                continue;
            }
            let claim = self.find_claim(&promotion.id, wallet_id)?;
            let legacy = claim.as_ref().map(|c| c.legacy_claimed).unwrap_or(false);
            if !promotion.claimable(legacy && migrate, now) {
                continue;
            }
            match claim {
                Some(c) if c.redeemed => continue,
                Some(_) => out.push(promotion),
                None => {
                    // Without a pre-registered claim an ads promotion has
                    // nothing to offer this wallet.
                    if promotion.kind == PromotionType::Ugp && promotion.remaining_grants > 0 {
                        out.push(promotion);
                    }
                }
            }
        }
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }
}
