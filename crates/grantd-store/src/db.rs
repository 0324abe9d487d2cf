use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use grantd_core::{
    BapReport, BatLossEvent, ClaimId, ClobberedClaim, GrantError, Issuer, Promotion, PromotionId,
    WalletId, WalletRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::lease::LeaseSet;

/// Persistent store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   promotions      — promotion id (16B)            → bincode(Promotion)
///   issuers         — promotion id + cohort utf8    → bincode(Issuer)
///   issuer_pubkeys  — public key utf8               → issuers tree key
///   claims          — claim id (16B)                → bincode(Claim)
///   claim_index     — promotion id + wallet id      → claim id (16B)
///   claim_creds     — claim id (16B)                → bincode(ClaimCreds)
///   drain_jobs      — job id (16B)                  → bincode(DrainJob)
///   drain_batches   — batch id + job id             → job id (16B)
///   mint_jobs       — job id (16B)                  → bincode(MintDrainJob)
///   suggestions     — job id (16B)                  → bincode(SuggestionJob)
///   wallets         — wallet id (16B)               → bincode(WalletRecord)
///   clobbered_claims — claim id (16B)               → bincode(ClobberedClaim)
///   bat_loss_events — wallet id + report id u64 BE  → bincode(BatLossEvent)
///   bap_reports     — wallet id (16B)               → bincode(BapReport)
///
/// Multi-row state transitions take `write_lock` for their read-check-write
/// span, which serializes them against each other; sled makes each key write
/// durable. Work selection goes through `leases` so concurrent workers never
/// process the same row.
pub struct Store {
    _db: sled::Db,
    pub(crate) promotions: sled::Tree,
    pub(crate) issuers: sled::Tree,
    pub(crate) issuer_pubkeys: sled::Tree,
    pub(crate) claims: sled::Tree,
    pub(crate) claim_index: sled::Tree,
    pub(crate) claim_creds: sled::Tree,
    pub(crate) drain_jobs: sled::Tree,
    pub(crate) drain_batches: sled::Tree,
    pub(crate) mint_jobs: sled::Tree,
    pub(crate) suggestions: sled::Tree,
    pub(crate) wallets: sled::Tree,
    pub(crate) clobbered_claims: sled::Tree,
    pub(crate) bat_loss_events: sled::Tree,
    pub(crate) bap_reports: sled::Tree,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) leases: LeaseSet,
}

pub(crate) fn enc<T: Serialize>(v: &T) -> Result<Vec<u8>, GrantError> {
    bincode::serialize(v).map_err(|e| GrantError::Serialization(e.to_string()))
}

pub(crate) fn dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GrantError> {
    bincode::deserialize(bytes).map_err(|e| GrantError::Serialization(e.to_string()))
}

pub(crate) fn storage_err(e: sled::Error) -> GrantError {
    GrantError::Storage(e.to_string())
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GrantError> {
        let db = sled::open(path).map_err(storage_err)?;
        let tree = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            promotions: tree("promotions")?,
            issuers: tree("issuers")?,
            issuer_pubkeys: tree("issuer_pubkeys")?,
            claims: tree("claims")?,
            claim_index: tree("claim_index")?,
            claim_creds: tree("claim_creds")?,
            drain_jobs: tree("drain_jobs")?,
            drain_batches: tree("drain_batches")?,
            mint_jobs: tree("mint_jobs")?,
            suggestions: tree("suggestions")?,
            wallets: tree("wallets")?,
            clobbered_claims: tree("clobbered_claims")?,
            bat_loss_events: tree("bat_loss_events")?,
            bap_reports: tree("bap_reports")?,
            write_lock: Mutex::new(()),
            leases: LeaseSet::new(),
            _db: db,
        })
    }

    pub(crate) fn get_tree<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, GrantError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(dec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put_tree<T: Serialize>(
        tree: &sled::Tree,
        key: &[u8],
        value: &T,
    ) -> Result<(), GrantError> {
        tree.insert(key, enc(value)?).map_err(storage_err)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), GrantError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Promotions ───────────────────────────────────────────────────────────

    pub fn put_promotion(&self, p: &Promotion) -> Result<(), GrantError> {
        Self::put_tree(&self.promotions, p.id.as_bytes(), p)
    }

    pub fn get_promotion(&self, id: &PromotionId) -> Result<Option<Promotion>, GrantError> {
        Self::get_tree(&self.promotions, id.as_bytes())
    }

    pub fn iter_promotions(&self) -> Result<Vec<Promotion>, GrantError> {
        let mut out = Vec::new();
        for item in self.promotions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Flip a promotion active. Creating its default-cohort issuer is the
    /// caller's (scheduler's) business.
    pub fn set_promotion_active(&self, id: &PromotionId, active: bool) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut p = self
            .get_promotion(id)?
            .ok_or(GrantError::PromotionNotFound)?;
        p.active = active;
        self.put_promotion(&p)
    }

    // ── Issuers ──────────────────────────────────────────────────────────────

    fn issuer_key(promotion_id: &PromotionId, cohort: &str) -> Vec<u8> {
        let mut key = promotion_id.as_bytes().to_vec();
        key.extend_from_slice(cohort.as_bytes());
        key
    }

    pub fn put_issuer(&self, issuer: &Issuer) -> Result<(), GrantError> {
        let key = Self::issuer_key(&issuer.promotion_id, &issuer.cohort);
        Self::put_tree(&self.issuers, &key, issuer)?;
        self.issuer_pubkeys
            .insert(issuer.public_key.as_bytes(), key)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_issuer(
        &self,
        promotion_id: &PromotionId,
        cohort: &str,
    ) -> Result<Option<Issuer>, GrantError> {
        Self::get_tree(&self.issuers, &Self::issuer_key(promotion_id, cohort))
    }

    pub fn get_issuer_by_id(&self, id: &uuid::Uuid) -> Result<Option<Issuer>, GrantError> {
        for item in self.issuers.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let issuer: Issuer = dec(&bytes)?;
            if issuer.id == *id {
                return Ok(Some(issuer));
            }
        }
        Ok(None)
    }

    pub fn get_issuer_by_public_key(&self, public_key: &str) -> Result<Option<Issuer>, GrantError> {
        match self
            .issuer_pubkeys
            .get(public_key.as_bytes())
            .map_err(storage_err)?
        {
            Some(key) => Self::get_tree(&self.issuers, &key),
            None => Ok(None),
        }
    }

    /// Active promotions that still lack their default-cohort issuer.
    pub fn promotions_missing_issuer(&self, cohort: &str) -> Result<Vec<Promotion>, GrantError> {
        let mut out = Vec::new();
        for p in self.iter_promotions()? {
            if p.active && self.get_issuer(&p.id, cohort)?.is_none() {
                out.push(p);
            }
        }
        Ok(out)
    }

    // ── Wallets ──────────────────────────────────────────────────────────────

    pub fn put_wallet(&self, w: &WalletRecord) -> Result<(), GrantError> {
        Self::put_tree(&self.wallets, w.id.as_bytes(), w)
    }

    pub fn get_wallet(&self, id: &WalletId) -> Result<Option<WalletRecord>, GrantError> {
        Self::get_tree(&self.wallets, id.as_bytes())
    }

    // ── Audit rows ───────────────────────────────────────────────────────────

    /// Record clobbered claims. Already-recorded ids are skipped, so client
    /// retries stay idempotent.
    pub fn insert_clobbered_claims(&self, claim_ids: &[ClaimId]) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        for id in claim_ids {
            if self
                .clobbered_claims
                .contains_key(id.as_bytes())
                .map_err(storage_err)?
            {
                continue;
            }
            let row = ClobberedClaim {
                claim_id: *id,
                reported_at: now,
            };
            Self::put_tree(&self.clobbered_claims, id.as_bytes(), &row)?;
        }
        Ok(())
    }

    fn bat_loss_key(wallet_id: &WalletId, report_id: u64) -> Vec<u8> {
        let mut key = wallet_id.as_bytes().to_vec();
        key.extend_from_slice(&report_id.to_be_bytes());
        key
    }

    /// Record a loss report. A replay with the same amount succeeds quietly;
    /// a replay with a different amount is a conflict.
    pub fn insert_bat_loss_event(&self, event: &BatLossEvent) -> Result<bool, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = Self::bat_loss_key(&event.wallet_id, event.report_id);
        if let Some(existing) = Self::get_tree::<BatLossEvent>(&self.bat_loss_events, &key)? {
            if existing.amount == event.amount {
                return Ok(false);
            }
            return Err(GrantError::DuplicateReport);
        }
        Self::put_tree(&self.bat_loss_events, &key, event)?;
        Ok(true)
    }

    /// Record an accounting snapshot; one per wallet, ever.
    pub fn insert_bap_report(&self, report: &BapReport) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = report.wallet_id.as_bytes();
        if self.bap_reports.contains_key(key).map_err(storage_err)? {
            return Err(GrantError::DuplicateReport);
        }
        Self::put_tree(&self.bap_reports, key, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempStore;
    use grantd_core::decimal::money;

    #[test]
    fn issuer_lookup_by_public_key() {
        let t = TempStore::new();
        let promotion_id = PromotionId::random();
        let issuer = Issuer {
            id: uuid::Uuid::new_v4(),
            promotion_id,
            cohort: "control".into(),
            public_key: "pk-1".into(),
            created_at: Utc::now(),
        };
        t.store.put_issuer(&issuer).unwrap();

        let by_pair = t.store.get_issuer(&promotion_id, "control").unwrap().unwrap();
        assert_eq!(by_pair.public_key, "pk-1");
        let by_key = t.store.get_issuer_by_public_key("pk-1").unwrap().unwrap();
        assert_eq!(by_key.promotion_id, promotion_id);
        assert!(t.store.get_issuer_by_public_key("pk-2").unwrap().is_none());
    }

    #[test]
    fn bat_loss_replay_same_amount_is_quiet_conflicting_amount_errors() {
        let t = TempStore::new();
        let event = BatLossEvent {
            wallet_id: WalletId::random(),
            report_id: 7,
            amount: money("1.5"),
            platform: "ios".into(),
            reported_at: Utc::now(),
        };
        assert!(t.store.insert_bat_loss_event(&event).unwrap());
        assert!(!t.store.insert_bat_loss_event(&event).unwrap());

        let mut conflicting = event.clone();
        conflicting.amount = money("2.0");
        assert!(matches!(
            t.store.insert_bat_loss_event(&conflicting),
            Err(GrantError::DuplicateReport)
        ));
    }

    #[test]
    fn bap_report_is_once_per_wallet() {
        let t = TempStore::new();
        let report = BapReport {
            wallet_id: WalletId::random(),
            amount: money("3"),
            reported_at: Utc::now(),
        };
        t.store.insert_bap_report(&report).unwrap();
        assert!(matches!(
            t.store.insert_bap_report(&report),
            Err(GrantError::DuplicateReport)
        ));
    }

    #[test]
    fn clobbered_claims_dedupe() {
        let t = TempStore::new();
        let a = ClaimId::random();
        let b = ClaimId::random();
        t.store.insert_clobbered_claims(&[a, b]).unwrap();
        t.store.insert_clobbered_claims(&[a]).unwrap();
        assert_eq!(t.store.clobbered_claims.len(), 2);
    }
}
