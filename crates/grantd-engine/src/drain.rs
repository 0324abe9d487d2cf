//! Drain initiation and the drain worker.
//!
//! A drain call resolves a wallet's credentials into funding sources,
//! classifies each against the wallet's claims, and inserts the whole set as
//! one batch of drain jobs — clean ones born `created`, misclassified ones
//! born failed with their code. The drain worker then redeems credentials
//! upstream, applies the reputation gates, and dispatches the value to the
//! wallet's custodian.

use chrono::Utc;
use grantd_core::decimal::Money;
use grantd_core::{
    BatchId, CredentialBinding, DepositProvider, DrainJob, DrainStatus, GrantError, MintDrainJob,
    PromotionType, WalletId, WalletRecord,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collab::DrainReputability;
use crate::custodian::{gemini_tx_ref, GeminiPayout};
use crate::resolver::ResolvedSource;
use crate::service::Service;

enum Classified {
    Skip(&'static str),
    Job(DrainJob),
}

impl Service {
    /// Initiate a drain of `bindings` from `wallet_id` to its linked
    /// custodian. Returns the batch id grouping the inserted jobs.
    pub async fn drain(
        &self,
        bindings: &[CredentialBinding],
        wallet_id: WalletId,
    ) -> Result<BatchId, GrantError> {
        if !self.config.enable_drains {
            return Err(GrantError::Other("drain pathway is disabled".into()));
        }
        let wallet = self
            .store
            .get_wallet(&wallet_id)?
            .ok_or_else(|| GrantError::WalletNotFound(wallet_id.to_string()))?;
        if !wallet.linked() {
            return Err(GrantError::WalletNotLinked);
        }
        let provider = wallet.deposit_provider.ok_or(GrantError::WalletNotLinked)?;

        let resolved = self.redeemed_credentials(bindings)?;
        let batch_id = BatchId::random();

        if provider == DepositProvider::Brave {
            // The mint path re-claims value onto the deposit account, which
            // only exists for iOS wallets.
            let on_ios = self
                .reputation
                .is_wallet_on_platform(wallet_id, "ios")
                .await?;
            if !on_ios {
                return Err(GrantError::UnsupportedPlatform("ios".into()));
            }
            let now = Utc::now();
            self.store.insert_mint_job(&MintDrainJob {
                id: Uuid::new_v4(),
                wallet_id,
                batch_id,
                promotion_ids: resolved.sources.iter().map(|s| s.promotion.id).collect(),
                total: Money::from(0),
                erred: false,
                errcode: None,
                completed: false,
                created_at: now,
                updated_at: now,
            })?;
        }

        let mut jobs = Vec::new();
        let mut clean = 0usize;
        for source in &resolved.sources {
            match self.classify_drain_source(source, &wallet, provider, batch_id)? {
                Classified::Skip(reason) => {
                    info!(promotion = %source.promotion.id, reason, "drain source skipped");
                }
                Classified::Job(job) => {
                    if !job.erred {
                        clean += 1;
                    }
                    jobs.push(job);
                }
            }
        }

        self.store.insert_drain_batch(&jobs)?;
        info!(batch = %batch_id, jobs = jobs.len(), clean, "drain batch inserted");

        for _ in 0..clean {
            self.scheduler.kick(crate::jobs::DRAINS);
        }
        if provider == DepositProvider::Brave {
            self.scheduler.kick(crate::jobs::MINT_DRAINS);
        }
        Ok(batch_id)
    }

    fn classify_drain_source(
        &self,
        source: &ResolvedSource,
        wallet: &WalletRecord,
        provider: DepositProvider,
        batch_id: BatchId,
    ) -> Result<Classified, GrantError> {
        let promotion = &source.promotion;
        if promotion.kind != PromotionType::Ads
            && provider != DepositProvider::Brave
            && promotion.platform != "ios"
        {
            return Ok(Classified::Skip("non-ads promotion outside the mint path"));
        }

        let claim = self.store.find_claim(&promotion.id, &wallet.id)?;
        let coded_err = match &claim {
            None => Some(GrantError::MismatchedWallet),
            Some(claim) if claim.drained => return Ok(Classified::Skip("claim already drained")),
            Some(claim) => match claim.suggestions_needed(promotion) {
                Err(_) => Some(GrantError::InvalidSuggestionCount),
                Ok(needed) => {
                    let allowance = Money::from(needed) * promotion.credential_value();
                    if source.funding.amount > allowance {
                        Some(GrantError::InvalidSuggestionAmount)
                    } else {
                        None
                    }
                }
            },
        };

        let now = Utc::now();
        let (status, erred, errcode) = match &coded_err {
            Some(err) => (
                DrainStatus::Failed,
                true,
                err.drain_code().map(str::to_string),
            ),
            None => (DrainStatus::Created, false, None),
        };
        Ok(Classified::Job(DrainJob {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            claim_id: claim.map(|c| c.id),
            batch_id,
            credentials: source.funding.credentials.clone(),
            total: source.funding.amount.clone(),
            transaction_id: None,
            deposit_destination: Some(wallet.deposit_destination.clone()),
            status,
            erred,
            errcode,
            completed: false,
            created_at: now,
            updated_at: now,
        }))
    }

    // ── Worker ───────────────────────────────────────────────────────────────

    /// One pass of the drain worker: lease a fresh job and run the transfer.
    pub async fn run_next_drain_job(&self) -> Result<bool, GrantError> {
        let Some((job, _lease)) = self.store.lease_next_created_drain()? else {
            return Ok(false);
        };
        self.process_drain_job(job, false).await?;
        Ok(true)
    }

    /// One pass of the retry worker: lease a resurrected job and re-run the
    /// transfer with credential redemption skipped (it already happened on
    /// the first attempt).
    pub async fn run_next_drain_retry_job(&self) -> Result<bool, GrantError> {
        let Some((job, _lease)) = self.store.lease_next_retriable_drain()? else {
            return Ok(false);
        };
        self.process_drain_job(job, true).await?;
        Ok(true)
    }

    async fn process_drain_job(&self, job: DrainJob, skip_redeem: bool) -> Result<(), GrantError> {
        match self.redeem_and_transfer_funds(&job, skip_redeem).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let next = match &err {
                    GrantError::DuplicateCredentialRedemption => DrainStatus::RetryBypassCbr,
                    GrantError::WalletDrainLimitExceeded
                    | GrantError::WalletNotReputable
                    | GrantError::ReputationServiceFailure(_) => DrainStatus::ReputationFailed,
                    _ => DrainStatus::Failed,
                };
                let errcode = err.drain_code().unwrap_or("drain_failure").to_string();
                warn!(job = %job.id, %err, errcode, "drain job failed");
                if next == DrainStatus::ReputationFailed {
                    self.emit_drain_attestation(&job, &errcode).await;
                }
                let fresh = self
                    .store
                    .get_drain_job(&job.id)?
                    .ok_or_else(|| GrantError::Storage(format!("drain job {} missing", job.id)))?;
                if fresh.may_transition_to(next) {
                    self.store.transition_drain_job(&job.id, next, |j| {
                        j.erred = true;
                        j.errcode = Some(errcode);
                    })?;
                } else {
                    self.store.mark_drain_erred(&job.id, &errcode)?;
                }
                Err(err)
            }
        }
    }

    /// Redeem the job's credentials upstream and move its value to the
    /// wallet's custodian.
    pub async fn redeem_and_transfer_funds(
        &self,
        job: &DrainJob,
        skip_redeem: bool,
    ) -> Result<(), GrantError> {
        let wallet = self
            .store
            .get_wallet(&job.wallet_id)?
            .ok_or_else(|| GrantError::WalletNotFound(job.wallet_id.to_string()))?;
        if !wallet.linked() {
            return Err(GrantError::WalletNotLinked);
        }
        let provider = wallet.deposit_provider.ok_or(GrantError::WalletNotLinked)?;
        let destination = wallet.deposit_destination.clone();

        if !skip_redeem {
            self.issuer_client
                .redeem_credentials(&job.credentials, &job.wallet_id.to_string())
                .await?;
        }

        if self.config.reputation_on_drain {
            self.check_drain_reputation(job, &destination).await?;
        }

        match provider {
            DepositProvider::Uphold => {
                let transfer_id = Uuid::new_v4().to_string();
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Prepared, |j| {
                        j.transaction_id = Some(transfer_id.clone());
                        j.erred = false;
                        j.errcode = None;
                    })?;
                self.uphold
                    .transfer(&destination, &job.total, &transfer_id)
                    .await?;
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Complete, |_| {})?;
            }
            DepositProvider::Bitflyer => {
                let transfer_id = Uuid::new_v4().to_string();
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Prepared, |j| {
                        j.transaction_id = Some(transfer_id);
                        j.erred = false;
                        j.errcode = None;
                    })?;
                // The actual transfer happens in the batch worker once the
                // whole batch is prepared.
                self.store
                    .transition_drain_job(&job.id, DrainStatus::BitflyerConsolidate, |_| {})?;
                self.scheduler.kick(crate::jobs::BATCH_PAYMENTS);
            }
            DepositProvider::Gemini => {
                let tx_ref = gemini_tx_ref(
                    &self.config.settlement_address,
                    "drain",
                    &destination,
                    "wallet",
                );
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Prepared, |j| {
                        j.transaction_id = Some(tx_ref.clone());
                        j.erred = false;
                        j.errcode = None;
                    })?;
                self.gemini
                    .upload_payout(&GeminiPayout {
                        tx_ref,
                        amount: job.total.clone(),
                        destination,
                    })
                    .await?;
                self.store
                    .transition_drain_job(&job.id, DrainStatus::GeminiPending, |_| {})?;
            }
            DepositProvider::Brave => {
                // No outbound transfer: credit the wallet's mint aggregate
                // and let the mint worker finalize once the batch settles.
                self.store.credit_mint_job(&job.batch_id, &job.total)?;
                let transfer_id = Uuid::new_v4().to_string();
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Prepared, |j| {
                        j.transaction_id = Some(transfer_id);
                        j.erred = false;
                        j.errcode = None;
                    })?;
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Complete, |_| {})?;
            }
        }
        Ok(())
    }

    async fn check_drain_reputation(
        &self,
        job: &DrainJob,
        destination: &str,
    ) -> Result<(), GrantError> {
        if self.config.reputation_withdrawal_on_drain {
            let claim_id = job.claim_id.ok_or(GrantError::MismatchedWallet)?;
            let claim = self
                .store
                .get_claim(&claim_id)?
                .ok_or(GrantError::ClaimNotFound)?;
            let withdrawn = self
                .store
                .sum_withdrawals(destination, &claim.promotion_id)?;
            match self
                .reputation
                .is_drain_reputable(job.wallet_id, claim.promotion_id, &withdrawn)
                .await
            {
                Ok(DrainReputability::Reputable) => Ok(()),
                Ok(DrainReputability::WithdrawalLimits) => {
                    Err(GrantError::WalletDrainLimitExceeded)
                }
                Ok(DrainReputability::NotReputable) => Err(GrantError::WalletNotReputable),
                Err(err) => Err(GrantError::ReputationServiceFailure(err.to_string())),
            }
        } else {
            match self.reputation.is_wallet_ads_reputable(job.wallet_id).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(GrantError::WalletNotReputable),
                Err(err) => Err(GrantError::ReputationServiceFailure(err.to_string())),
            }
        }
    }

    /// Record a reputation-gated drain failure on the attestation topic so
    /// operators can review it. Best effort: the durable truth is the job
    /// row, so a publish failure is only logged.
    async fn emit_drain_attestation(&self, job: &DrainJob, errcode: &str) {
        let event = crate::events::AdminAttestationEvent {
            wallet_id: job.wallet_id.to_string(),
            service: "grantd".into(),
            signal: "drain_reputation_failure".into(),
            score: 0,
            justification: errcode.to_string(),
            created_at: Utc::now(),
        };
        let Ok(payload) = serde_json::to_vec(&event) else {
            return;
        };
        if let Err(error) = self
            .events
            .publish(&self.topics.attestation, &job.wallet_id.to_string(), &payload)
            .await
        {
            warn!(%error, wallet = %job.wallet_id, "attestation publish failed");
        }
    }

    /// Move a wallet's reputation-failed drains to manual retry (operator
    /// action). Returns how many jobs moved.
    pub fn make_drains_retriable(&self, wallet_id: WalletId) -> Result<usize, GrantError> {
        let moved = self.store.update_drain_jobs_retriable(&wallet_id)?;
        if moved > 0 {
            self.scheduler.kick(crate::jobs::DRAIN_RETRIES);
        }
        Ok(moved)
    }
}
