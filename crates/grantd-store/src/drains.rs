//! Drain, mint, and suggestion job operations.

use chrono::{Duration, Utc};
use grantd_core::decimal::Money;
use grantd_core::{
    BatchId, DrainJob, DrainStatus, GrantError, MintDrainJob, PromotionId, SuggestionJob, WalletId,
};
use uuid::Uuid;

use crate::db::{dec, storage_err, Store};
use crate::LeaseGuard;

impl Store {
    fn batch_index_key(batch_id: &BatchId, job_id: &Uuid) -> Vec<u8> {
        let mut key = batch_id.as_bytes().to_vec();
        key.extend_from_slice(job_id.as_bytes());
        key
    }

    // ── Inserts ──────────────────────────────────────────────────────────────

    /// Insert every job of one drain call as a unit. Jobs arriving with
    /// `erred` set were classified as failures up front and are born in
    /// their terminal state; this two-pass insert is what ties a batch
    /// together. Claims behind clean jobs are marked drained in the same
    /// critical section — inserting the job is what consumes the claim, so
    /// a repeated drain call skips it.
    pub fn insert_drain_batch(&self, jobs: &[DrainJob]) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        for job in jobs {
            Self::put_tree(&self.drain_jobs, job.id.as_bytes(), job)?;
            self.drain_batches
                .insert(
                    Self::batch_index_key(&job.batch_id, &job.id),
                    job.id.as_bytes().as_slice(),
                )
                .map_err(storage_err)?;
            if job.erred {
                continue;
            }
            if let Some(claim_id) = job.claim_id {
                if let Some(mut claim) = self.get_claim(&claim_id)? {
                    claim.drained = true;
                    claim.drained_at = Some(now);
                    claim.updated_at = now;
                    Self::put_tree(&self.claims, claim_id.as_bytes(), &claim)?;
                }
            }
        }
        Ok(())
    }

    pub fn get_drain_job(&self, id: &Uuid) -> Result<Option<DrainJob>, GrantError> {
        Self::get_tree(&self.drain_jobs, id.as_bytes())
    }

    /// All jobs of one batch, read as one consistent snapshot.
    pub fn drain_jobs_in_batch(&self, batch_id: &BatchId) -> Result<Vec<DrainJob>, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for item in self.drain_batches.scan_prefix(batch_id.as_bytes()) {
            let (_, job_id) = item.map_err(storage_err)?;
            if let Some(job) = Self::get_tree::<DrainJob>(&self.drain_jobs, &job_id)? {
                out.push(job);
            }
        }
        out.sort_by_key(|j| j.created_at);
        Ok(out)
    }

    fn iter_drain_jobs(&self) -> Result<Vec<DrainJob>, GrantError> {
        let mut out = Vec::new();
        for item in self.drain_jobs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// Move a drain job to `next`, applying `mutate` to the row in the same
    /// critical section. Illegal transitions (including any movement out of
    /// a completed or terminal job) are storage errors — they indicate a
    /// worker bug, not a business outcome.
    pub fn transition_drain_job(
        &self,
        id: &Uuid,
        next: DrainStatus,
        mutate: impl FnOnce(&mut DrainJob),
    ) -> Result<DrainJob, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self
            .get_drain_job(id)?
            .ok_or_else(|| GrantError::Storage(format!("drain job {id} missing")))?;
        if !job.may_transition_to(next) {
            return Err(GrantError::Storage(format!(
                "illegal drain transition {} -> {} for job {id}",
                job.status, next
            )));
        }
        job.status = next;
        if next == DrainStatus::Complete {
            job.completed = true;
        }
        mutate(&mut job);
        job.updated_at = Utc::now();
        Self::put_tree(&self.drain_jobs, id.as_bytes(), &job)?;
        Ok(job)
    }

    /// Persist a failure on the row without moving its status, leaving the
    /// job selectable for the next submission round. Refused for completed
    /// or terminal jobs.
    pub fn mark_drain_erred(&self, id: &Uuid, errcode: &str) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self
            .get_drain_job(id)?
            .ok_or_else(|| GrantError::Storage(format!("drain job {id} missing")))?;
        if job.completed || job.status.terminal() {
            return Err(GrantError::Storage(format!(
                "cannot err terminal drain job {id}"
            )));
        }
        job.erred = true;
        job.errcode = Some(errcode.to_string());
        job.updated_at = Utc::now();
        Self::put_tree(&self.drain_jobs, id.as_bytes(), &job)
    }

    /// Bump updated_at without changing status (used to hold a pending job
    /// out of the poll window for a cooldown).
    pub fn touch_drain_job(&self, id: &Uuid) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self
            .get_drain_job(id)?
            .ok_or_else(|| GrantError::Storage(format!("drain job {id} missing")))?;
        job.updated_at = Utc::now();
        Self::put_tree(&self.drain_jobs, id.as_bytes(), &job)
    }

    /// Resurrect a wallet's reputation-failed drains for manual retry.
    /// Returns how many jobs moved.
    pub fn update_drain_jobs_retriable(&self, wallet_id: &WalletId) -> Result<usize, GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut moved = 0;
        for mut job in self.iter_drain_jobs()? {
            if job.wallet_id != *wallet_id || job.status != DrainStatus::ReputationFailed {
                continue;
            }
            job.status = DrainStatus::ManualRetry;
            job.erred = false;
            job.updated_at = Utc::now();
            Self::put_tree(&self.drain_jobs, job.id.as_bytes(), &job)?;
            moved += 1;
        }
        Ok(moved)
    }

    // ── Work selection ───────────────────────────────────────────────────────

    fn lease_drain(&self, job: &DrainJob) -> Option<LeaseGuard> {
        let mut key = b"drain/".to_vec();
        key.extend_from_slice(job.id.as_bytes());
        self.leases.acquire(key)
    }

    /// Oldest freshly-created drain job, leased.
    pub fn lease_next_created_drain(
        &self,
    ) -> Result<Option<(DrainJob, LeaseGuard)>, GrantError> {
        self.lease_drain_with_status(&[DrainStatus::Created])
    }

    /// Oldest drain job resurrected for retry, leased.
    pub fn lease_next_retriable_drain(
        &self,
    ) -> Result<Option<(DrainJob, LeaseGuard)>, GrantError> {
        self.lease_drain_with_status(&[DrainStatus::ManualRetry, DrainStatus::RetryBypassCbr])
    }

    fn lease_drain_with_status(
        &self,
        statuses: &[DrainStatus],
    ) -> Result<Option<(DrainJob, LeaseGuard)>, GrantError> {
        let mut jobs: Vec<DrainJob> = self
            .iter_drain_jobs()?
            .into_iter()
            .filter(|j| statuses.contains(&j.status) && !j.completed)
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        for job in jobs {
            if let Some(guard) = self.lease_drain(&job) {
                return Ok(Some((job, guard)));
            }
        }
        Ok(None)
    }

    /// Oldest custodian-pending job whose cooldown has elapsed, leased.
    pub fn lease_next_gemini_pending(
        &self,
        cooldown_secs: i64,
    ) -> Result<Option<(DrainJob, LeaseGuard)>, GrantError> {
        let cutoff = Utc::now() - Duration::seconds(cooldown_secs);
        let mut jobs: Vec<DrainJob> = self
            .iter_drain_jobs()?
            .into_iter()
            .filter(|j| {
                j.status == DrainStatus::GeminiPending && !j.completed && j.updated_at <= cutoff
            })
            .collect();
        jobs.sort_by_key(|j| j.updated_at);
        for job in jobs {
            if let Some(guard) = self.lease_drain(&job) {
                return Ok(Some((job, guard)));
            }
        }
        Ok(None)
    }

    /// Whether every non-erred member of the batch is at least prepared
    /// (has its custodian transaction id). The batch worker must not act
    /// before this holds.
    pub fn batch_ready(&self, batch_id: &BatchId) -> Result<bool, GrantError> {
        let jobs = self.drain_jobs_in_batch(batch_id)?;
        if jobs.is_empty() {
            return Ok(false);
        }
        Ok(jobs
            .iter()
            .filter(|j| !j.erred)
            .all(|j| j.transaction_id.is_some()))
    }

    /// A batch with consolidation work outstanding and every member
    /// prepared, leased for submission.
    pub fn lease_next_submittable_batch(
        &self,
    ) -> Result<Option<(BatchId, LeaseGuard)>, GrantError> {
        let mut batches: Vec<BatchId> = Vec::new();
        for job in self.iter_drain_jobs()? {
            if job.status == DrainStatus::BitflyerConsolidate && !batches.contains(&job.batch_id) {
                batches.push(job.batch_id);
            }
        }
        for batch_id in batches {
            if !self.batch_ready(&batch_id)? {
                continue;
            }
            let mut key = b"batch/".to_vec();
            key.extend_from_slice(batch_id.as_bytes());
            if let Some(guard) = self.leases.acquire(key) {
                return Ok(Some((batch_id, guard)));
            }
        }
        Ok(None)
    }

    /// Prior outflow to `deposit_destination` drawn from `promotion_id`,
    /// counting transfers already handed to a custodian.
    pub fn sum_withdrawals(
        &self,
        deposit_destination: &str,
        promotion_id: &PromotionId,
    ) -> Result<Money, GrantError> {
        let mut total = Money::from(0);
        for job in self.iter_drain_jobs()? {
            if job.deposit_destination.as_deref() != Some(deposit_destination) {
                continue;
            }
            if !matches!(job.status, DrainStatus::Submitted | DrainStatus::Complete) {
                continue;
            }
            let Some(claim_id) = job.claim_id else { continue };
            let Some(claim) = self.get_claim(&claim_id)? else { continue };
            if claim.promotion_id == *promotion_id {
                total += &job.total;
            }
        }
        Ok(total)
    }

    // ── Mint jobs ────────────────────────────────────────────────────────────

    pub fn insert_mint_job(&self, job: &MintDrainJob) -> Result<(), GrantError> {
        Self::put_tree(&self.mint_jobs, job.id.as_bytes(), job)
    }

    pub fn get_mint_job(&self, id: &Uuid) -> Result<Option<MintDrainJob>, GrantError> {
        Self::get_tree(&self.mint_jobs, id.as_bytes())
    }

    /// Add one drain job's share into the wallet's mint aggregate.
    pub fn credit_mint_job(&self, batch_id: &BatchId, amount: &Money) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        for item in self.mint_jobs.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let mut job: MintDrainJob = dec(&bytes)?;
            if job.batch_id != *batch_id || job.completed {
                continue;
            }
            job.total += amount;
            job.updated_at = Utc::now();
            self.mint_jobs
                .insert(key, crate::db::enc(&job)?)
                .map_err(storage_err)?;
            return Ok(());
        }
        Err(GrantError::Storage(format!(
            "no open mint job for batch {batch_id}"
        )))
    }

    /// A mint job whose batch has fully settled: every non-erred drain job
    /// is completed, so the aggregate can no longer grow.
    pub fn lease_next_ready_mint_job(
        &self,
    ) -> Result<Option<(MintDrainJob, LeaseGuard)>, GrantError> {
        let mut jobs: Vec<MintDrainJob> = Vec::new();
        for item in self.mint_jobs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let job: MintDrainJob = dec(&bytes)?;
            if !job.completed && !job.erred {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        for job in jobs {
            let members = self.drain_jobs_in_batch(&job.batch_id)?;
            let settled = !members.is_empty()
                && members.iter().filter(|j| !j.erred).all(|j| j.completed);
            if !settled {
                continue;
            }
            let mut key = b"mint/".to_vec();
            key.extend_from_slice(job.id.as_bytes());
            if let Some(guard) = self.leases.acquire(key) {
                return Ok(Some((job, guard)));
            }
        }
        Ok(None)
    }

    pub fn complete_mint_job(&self, id: &Uuid) -> Result<(), GrantError> {
        self.update_mint_job(id, |job| {
            job.completed = true;
        })
    }

    pub fn fail_mint_job(&self, id: &Uuid, errcode: &str) -> Result<(), GrantError> {
        self.update_mint_job(id, |job| {
            job.erred = true;
            job.errcode = Some(errcode.to_string());
        })
    }

    fn update_mint_job(
        &self,
        id: &Uuid,
        mutate: impl FnOnce(&mut MintDrainJob),
    ) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self
            .get_mint_job(id)?
            .ok_or_else(|| GrantError::Storage(format!("mint job {id} missing")))?;
        mutate(&mut job);
        job.updated_at = Utc::now();
        Self::put_tree(&self.mint_jobs, id.as_bytes(), &job)
    }

    // ── Suggestion jobs ──────────────────────────────────────────────────────

    pub fn insert_suggestion_job(&self, job: &SuggestionJob) -> Result<(), GrantError> {
        Self::put_tree(&self.suggestions, job.id.as_bytes(), job)
    }

    pub fn lease_next_suggestion_job(
        &self,
    ) -> Result<Option<(SuggestionJob, LeaseGuard)>, GrantError> {
        let mut jobs: Vec<SuggestionJob> = Vec::new();
        for item in self.suggestions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let job: SuggestionJob = dec(&bytes)?;
            if !job.erred {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        for job in jobs {
            let mut key = b"suggestion/".to_vec();
            key.extend_from_slice(job.id.as_bytes());
            if let Some(guard) = self.leases.acquire(key) {
                return Ok(Some((job, guard)));
            }
        }
        Ok(None)
    }

    /// Emission succeeded; the job row is done and removed.
    pub fn complete_suggestion_job(&self, id: &Uuid) -> Result<(), GrantError> {
        self.suggestions.remove(id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn fail_suggestion_job(&self, id: &Uuid, errcode: &str) -> Result<(), GrantError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut job) = Self::get_tree::<SuggestionJob>(&self.suggestions, id.as_bytes())?
        else {
            return Ok(());
        };
        job.erred = true;
        job.errcode = Some(errcode.to_string());
        Self::put_tree(&self.suggestions, id.as_bytes(), &job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempStore;
    use grantd_core::decimal::money;
    use grantd_core::ClaimId;

    fn job(batch_id: BatchId, status: DrainStatus, erred: bool) -> DrainJob {
        let now = Utc::now();
        DrainJob {
            id: Uuid::new_v4(),
            wallet_id: WalletId::random(),
            claim_id: Some(ClaimId::random()),
            batch_id,
            credentials: vec![],
            total: money("0.25"),
            transaction_id: None,
            deposit_destination: Some("dest".into()),
            status,
            erred,
            errcode: None,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn batch_insert_and_snapshot() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let jobs = vec![
            job(batch_id, DrainStatus::Created, false),
            job(batch_id, DrainStatus::Failed, true),
        ];
        t.store.insert_drain_batch(&jobs).unwrap();
        let snapshot = t.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.iter().filter(|j| j.erred).count(), 1);
    }

    #[test]
    fn batch_not_ready_until_all_clean_jobs_prepared() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let a = job(batch_id, DrainStatus::Created, false);
        let b = job(batch_id, DrainStatus::Created, false);
        let failed = job(batch_id, DrainStatus::Failed, true);
        t.store
            .insert_drain_batch(&[a.clone(), b.clone(), failed])
            .unwrap();
        assert!(!t.store.batch_ready(&batch_id).unwrap());

        t.store
            .transition_drain_job(&a.id, DrainStatus::Prepared, |j| {
                j.transaction_id = Some(Uuid::new_v4().to_string());
            })
            .unwrap();
        assert!(!t.store.batch_ready(&batch_id).unwrap());

        t.store
            .transition_drain_job(&b.id, DrainStatus::Prepared, |j| {
                j.transaction_id = Some(Uuid::new_v4().to_string());
            })
            .unwrap();
        // The erred member does not hold the batch back.
        assert!(t.store.batch_ready(&batch_id).unwrap());
    }

    #[test]
    fn completed_job_is_immutable() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let a = job(batch_id, DrainStatus::Prepared, false);
        t.store.insert_drain_batch(&[a.clone()]).unwrap();
        t.store
            .transition_drain_job(&a.id, DrainStatus::Complete, |_| {})
            .unwrap();

        let err = t
            .store
            .transition_drain_job(&a.id, DrainStatus::Failed, |_| {})
            .unwrap_err();
        assert!(matches!(err, GrantError::Storage(_)));
        let fresh = t.store.get_drain_job(&a.id).unwrap().unwrap();
        assert!(fresh.completed);
        assert_eq!(fresh.status, DrainStatus::Complete);
    }

    #[test]
    fn retriable_update_moves_only_reputation_failures() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let wallet = WalletId::random();
        let mut stuck = job(batch_id, DrainStatus::ReputationFailed, true);
        stuck.wallet_id = wallet;
        let mut terminal = job(batch_id, DrainStatus::Failed, true);
        terminal.wallet_id = wallet;
        t.store
            .insert_drain_batch(&[stuck.clone(), terminal.clone()])
            .unwrap();

        let moved = t.store.update_drain_jobs_retriable(&wallet).unwrap();
        assert_eq!(moved, 1);
        let fresh = t.store.get_drain_job(&stuck.id).unwrap().unwrap();
        assert_eq!(fresh.status, DrainStatus::ManualRetry);
        assert!(!fresh.erred);
        let untouched = t.store.get_drain_job(&terminal.id).unwrap().unwrap();
        assert_eq!(untouched.status, DrainStatus::Failed);

        let leased = t.store.lease_next_retriable_drain().unwrap().unwrap();
        assert_eq!(leased.0.id, stuck.id);
    }

    #[test]
    fn gemini_cooldown_hides_recently_polled_jobs() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let mut pending = job(batch_id, DrainStatus::Prepared, false);
        pending.transaction_id = Some(Uuid::new_v4().to_string());
        t.store.insert_drain_batch(&[pending.clone()]).unwrap();
        t.store
            .transition_drain_job(&pending.id, DrainStatus::GeminiPending, |_| {})
            .unwrap();

        // Just transitioned — updated_at is fresh, inside the cooldown.
        assert!(t.store.lease_next_gemini_pending(600).unwrap().is_none());
        // With no cooldown it is selectable.
        let (leased, _guard) = t.store.lease_next_gemini_pending(0).unwrap().unwrap();
        assert_eq!(leased.id, pending.id);
    }

    #[test]
    fn mint_job_waits_for_batch_settlement() {
        let t = TempStore::new();
        let batch_id = BatchId::random();
        let drain = job(batch_id, DrainStatus::Prepared, false);
        t.store.insert_drain_batch(&[drain.clone()]).unwrap();

        let now = Utc::now();
        let mint = MintDrainJob {
            id: Uuid::new_v4(),
            wallet_id: WalletId::random(),
            batch_id,
            promotion_ids: vec![],
            total: money("0"),
            erred: false,
            errcode: None,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        t.store.insert_mint_job(&mint).unwrap();
        assert!(t.store.lease_next_ready_mint_job().unwrap().is_none());

        t.store.credit_mint_job(&batch_id, &money("0.25")).unwrap();
        t.store
            .transition_drain_job(&drain.id, DrainStatus::Complete, |_| {})
            .unwrap();

        let (ready, _guard) = t.store.lease_next_ready_mint_job().unwrap().unwrap();
        assert_eq!(ready.id, mint.id);
        assert_eq!(ready.total, money("0.25"));
    }
}
