//! The batch payment worker and custodian status polling.
//!
//! Bitflyer transfers are consolidated per batch and submitted as one bulk
//! payout line, under a hard JPY ceiling; whatever does not fit stays in the
//! batch, flagged retriable, and the ceiling error is surfaced last so the
//! caller sees the truth about the partial outcome. Gemini transfers settle
//! asynchronously and are polled on a cooldown.

use grantd_core::decimal::{floor_bat, Money};
use grantd_core::{BatchId, DrainJob, DrainStatus, GrantError, JPY_TRANSFER_CAP};
use tracing::{info, warn};

use crate::custodian::{BitflyerWithdrawal, GeminiTxStatus};
use crate::service::Service;

impl Service {
    /// One pass of the batch worker: lease a batch that is fully prepared
    /// and has consolidation work outstanding, then submit it.
    pub async fn run_next_batch_payments_job(&self) -> Result<bool, GrantError> {
        let Some((batch_id, _lease)) = self.store.lease_next_submittable_batch()? else {
            return Ok(false);
        };
        self.submit_batch_transfer(&batch_id).await?;
        Ok(true)
    }

    /// Submit one batch's consolidated Bitflyer transfers.
    pub async fn submit_batch_transfer(&self, batch_id: &BatchId) -> Result<(), GrantError> {
        let rate = match self.bitflyer.fetch_quote().await {
            Err(GrantError::CustodianUnauthorized) => {
                self.bitflyer.refresh_token().await?;
                self.bitflyer.fetch_quote().await?
            }
            other => other?,
        };

        let jobs = self.store.drain_jobs_in_batch(batch_id)?;
        let transfers: Vec<&DrainJob> = jobs
            .iter()
            .filter(|j| j.status == DrainStatus::BitflyerConsolidate)
            .collect();
        if transfers.is_empty() {
            return Ok(());
        }

        // Walk the transfers, taking them while the accumulated JPY value
        // stays at or under the ceiling.
        let mut total_bat = Money::from(0);
        let mut included: Vec<&DrainJob> = Vec::new();
        for &transfer in &transfers {
            let jpy = (&total_bat + &transfer.total) * &rate;
            if jpy > *JPY_TRANSFER_CAP {
                break;
            }
            total_bat += &transfer.total;
            included.push(transfer);
        }
        let over_limit = included.len() < transfers.len();

        // Every member of a batch must name the same deposit account; a
        // null or divergent one poisons the whole submission.
        let mut deposit_id: Option<&str> = None;
        for transfer in &transfers {
            match (deposit_id, transfer.deposit_destination.as_deref()) {
                (_, None) | (_, Some("")) => {
                    for t in &transfers {
                        self.store
                            .transition_drain_job(&t.id, DrainStatus::Failed, |j| {
                                j.erred = true;
                                j.errcode = Some("invalid_deposit_id".into());
                            })?;
                    }
                    return Err(GrantError::InvalidDepositId);
                }
                (Some(seen), Some(dest)) if seen != dest => {
                    for t in &transfers {
                        self.store
                            .transition_drain_job(&t.id, DrainStatus::Failed, |j| {
                                j.erred = true;
                                j.errcode = Some("invalid_deposit_id".into());
                            })?;
                    }
                    return Err(GrantError::InvalidDepositId);
                }
                (None, Some(dest)) => deposit_id = Some(dest),
                _ => {}
            }
        }

        if !included.is_empty() {
            let deposit_id = deposit_id.unwrap_or_default().to_string();
            // One consolidated line per batch: the custodian charges per
            // transaction, so collapsing is materially cheaper.
            let withdrawal = BitflyerWithdrawal {
                transfer_id: batch_id.to_string(),
                amount: floor_bat(&total_bat),
                deposit_id,
            };
            let results = match self.bitflyer.upload_bulk_payout(&[withdrawal.clone()]).await {
                Err(GrantError::CustodianUnauthorized) => {
                    self.bitflyer.refresh_token().await?;
                    self.bitflyer.upload_bulk_payout(&[withdrawal]).await?
                }
                other => other?,
            };

            if results.is_empty() {
                for t in &included {
                    self.store.mark_drain_erred(&t.id, "nil_response")?;
                }
                return Err(GrantError::NilCustodianResponse);
            }

            for result in &results {
                if !result.failed() {
                    continue;
                }
                if result.status == "NO_INV" {
                    // Insufficient inventory on the custodian side; retrying
                    // cannot help.
                    for t in &included {
                        self.store
                            .transition_drain_job(&t.id, DrainStatus::Failed, |j| {
                                j.erred = true;
                                j.errcode = Some("bitflyer_no_inv".into());
                            })?;
                    }
                    return Err(GrantError::CustodianWithdrawalFailed {
                        status: result.status.clone(),
                        retriable: false,
                    });
                }
                let errcode = format!("bitflyer_{}", result.status.to_lowercase());
                for t in &included {
                    self.store.mark_drain_erred(&t.id, &errcode)?;
                }
                return Err(GrantError::CustodianWithdrawalFailed {
                    status: result.status.clone(),
                    retriable: true,
                });
            }

            for t in &included {
                self.store
                    .transition_drain_job(&t.id, DrainStatus::Submitted, |j| {
                        j.erred = false;
                        j.errcode = None;
                    })?;
                self.store
                    .transition_drain_job(&t.id, DrainStatus::Complete, |_| {})?;
            }
            info!(batch = %batch_id, submitted = included.len(), "bulk payout submitted");
        }

        if over_limit {
            // Surface the ceiling last, after everything that fit was
            // submitted, so the caller sees the partial outcome truthfully.
            for t in transfers.iter().skip(included.len()) {
                self.store.mark_drain_erred(&t.id, "bf_transfer_limit")?;
            }
            warn!(batch = %batch_id, held_back = transfers.len() - included.len(), "transfer ceiling hit");
            return Err(GrantError::TransferLimitExceeded {
                submitted: included.len(),
                requested: transfers.len(),
            });
        }
        Ok(())
    }

    // ── Gemini polling ───────────────────────────────────────────────────────

    /// One pass of the status poller: lease a pending Gemini transfer whose
    /// cooldown elapsed and reconcile its settlement status.
    pub async fn run_next_gemini_status_job(&self) -> Result<bool, GrantError> {
        let Some((job, _lease)) = self
            .store
            .lease_next_gemini_pending(self.config.gemini_poll_cooldown_secs)?
        else {
            return Ok(false);
        };
        let tx_ref = job.transaction_id.clone().ok_or_else(|| {
            GrantError::Storage(format!("gemini-pending job {} has no transfer ref", job.id))
        })?;

        // A provider error propagates without touching the row; the next
        // pass will poll again.
        match self.gemini.check_status(&tx_ref).await? {
            GeminiTxStatus::Completed => {
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Complete, |_| {})?;
                info!(job = %job.id, "gemini transfer settled");
            }
            GeminiTxStatus::Pending | GeminiTxStatus::Processing => {
                // Still in flight; push the row out of the poll window.
                self.store.touch_drain_job(&job.id)?;
            }
            GeminiTxStatus::Failed(reason) => {
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Failed, |j| {
                        j.erred = true;
                        j.errcode = Some(reason.clone());
                    })?;
            }
            GeminiTxStatus::NotFound => {
                self.store
                    .transition_drain_job(&job.id, DrainStatus::Failed, |j| {
                        j.erred = true;
                        j.errcode = Some("GEMINI_NOT_FOUND".into());
                    })?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{
        ads_promotion_with_issuer, bindings_for, claimed_wallet, seed_wallet, TestService,
    };
    use grantd_core::decimal::money;
    use grantd_core::DepositProvider;

    async fn consolidated_batch(t: &TestService, public_key: &str) -> BatchId {
        let promotion = ads_promotion_with_issuer(t, public_key);
        let wallet = seed_wallet(&t.service, Some(DepositProvider::Bitflyer));
        claimed_wallet(t, &promotion, wallet, "30");
        let batch_id = t
            .service
            .drain(&bindings_for(public_key, 1), wallet)
            .await
            .unwrap();
        assert!(t.service.run_next_drain_job().await.unwrap());
        batch_id
    }

    #[tokio::test]
    async fn consolidated_batch_submits_and_completes() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        let batch_id = consolidated_batch(&t, "pk-1").await;

        assert!(t.service.run_next_batch_payments_job().await.unwrap());

        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Complete);
        assert!(jobs[0].completed);
        let uploads = t.bitflyer.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].transfer_id, batch_id.to_string());
        assert_eq!(uploads[0].amount, money("0.25"));
    }

    #[tokio::test]
    async fn astronomical_rate_hits_the_ceiling() {
        let t = TestService::new();
        // 0.25 BAT × this rate is far over 100,000 JPY.
        t.bitflyer.set_quote(money("100000000000000.025"));
        let batch_id = consolidated_batch(&t, "pk-1").await;

        let err = t.service.run_next_batch_payments_job().await.unwrap_err();
        assert!(matches!(
            err,
            GrantError::TransferLimitExceeded { submitted: 0, requested: 1 }
        ));

        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert!(jobs[0].erred);
        assert_eq!(jobs[0].errcode.as_deref(), Some("bf_transfer_limit"));
        // Still consolidating: the next submission round may retry it.
        assert_eq!(jobs[0].status, DrainStatus::BitflyerConsolidate);
        assert!(t.bitflyer.uploads().is_empty());
    }

    #[tokio::test]
    async fn sum_exactly_at_the_ceiling_is_accepted() {
        let t = TestService::new();
        // 0.25 BAT × 400,000 JPY/BAT = exactly 100,000 JPY.
        t.bitflyer.set_quote(money("400000"));
        let batch_id = consolidated_batch(&t, "pk-1").await;

        assert!(t.service.run_next_batch_payments_job().await.unwrap());
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Complete);
    }

    #[tokio::test]
    async fn just_over_the_ceiling_is_held_back() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("400000.004"));
        let _ = consolidated_batch(&t, "pk-1").await;

        let err = t.service.run_next_batch_payments_job().await.unwrap_err();
        assert!(matches!(err, GrantError::TransferLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn unauthorized_quote_refreshes_token_and_retries_once() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        t.bitflyer.fail_next_quote_unauthorized();
        let batch_id = consolidated_batch(&t, "pk-1").await;

        assert!(t.service.run_next_batch_payments_job().await.unwrap());
        assert_eq!(t.bitflyer.token_refreshes(), 1);
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Complete);
    }

    #[tokio::test]
    async fn no_inventory_fails_terminally() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        t.bitflyer.set_withdraw_status("NO_INV");
        let batch_id = consolidated_batch(&t, "pk-1").await;

        let err = t.service.run_next_batch_payments_job().await.unwrap_err();
        assert!(matches!(
            err,
            GrantError::CustodianWithdrawalFailed { retriable: false, .. }
        ));
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Failed);
        assert_eq!(jobs[0].errcode.as_deref(), Some("bitflyer_no_inv"));
    }

    #[tokio::test]
    async fn other_withdrawal_failures_stay_retriable() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        t.bitflyer.set_withdraw_status("OTHER_ERROR");
        let batch_id = consolidated_batch(&t, "pk-1").await;

        let err = t.service.run_next_batch_payments_job().await.unwrap_err();
        assert!(matches!(
            err,
            GrantError::CustodianWithdrawalFailed { retriable: true, .. }
        ));
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::BitflyerConsolidate);
        assert_eq!(jobs[0].errcode.as_deref(), Some("bitflyer_other_error"));
    }

    #[tokio::test]
    async fn empty_custodian_response_is_nil_response() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        t.bitflyer.set_empty_response();
        let batch_id = consolidated_batch(&t, "pk-1").await;

        let err = t.service.run_next_batch_payments_job().await.unwrap_err();
        assert!(matches!(err, GrantError::NilCustodianResponse));
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].errcode.as_deref(), Some("nil_response"));
    }

    #[tokio::test]
    async fn batch_waits_until_every_member_is_prepared() {
        let t = TestService::new();
        t.bitflyer.set_quote(money("100"));
        let p1 = ads_promotion_with_issuer(&t, "pk-1");
        let p2 = ads_promotion_with_issuer(&t, "pk-2");
        let wallet = seed_wallet(&t.service, Some(DepositProvider::Bitflyer));
        claimed_wallet(&t, &p1, wallet, "30");
        claimed_wallet(&t, &p2, wallet, "30");

        let mut bindings = bindings_for("pk-1", 1);
        bindings.extend(bindings_for("pk-2", 1));
        let batch_id = t.service.drain(&bindings, wallet).await.unwrap();

        // Only one of the two members has run through the drain worker.
        assert!(t.service.run_next_drain_job().await.unwrap());
        assert!(!t.service.run_next_batch_payments_job().await.unwrap());

        assert!(t.service.run_next_drain_job().await.unwrap());
        assert!(t.service.run_next_batch_payments_job().await.unwrap());

        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert!(jobs.iter().all(|j| j.status == DrainStatus::Complete));
        // One consolidated upload line for both members.
        let uploads = t.bitflyer.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].amount, money("0.50"));
    }

    #[tokio::test]
    async fn gemini_pending_stays_pending_and_respects_the_cooldown() {
        let mut t = TestService::new();
        let promotion = ads_promotion_with_issuer(&t, "pk-1");
        let wallet = seed_wallet(&t.service, Some(DepositProvider::Gemini));
        claimed_wallet(&t, &promotion, wallet, "30");
        let batch_id = t
            .service
            .drain(&bindings_for("pk-1", 1), wallet)
            .await
            .unwrap();
        assert!(t.service.run_next_drain_job().await.unwrap());

        // Freshly uploaded: inside the poll cooldown, nothing to do.
        t.gemini.set_status(GeminiTxStatus::Pending);
        assert!(!t.service.run_next_gemini_status_job().await.unwrap());

        // With the cooldown open, a pending poll leaves the job pending.
        t.set_gemini_cooldown(0);
        assert!(t.service.run_next_gemini_status_job().await.unwrap());
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::GeminiPending);
        assert!(!jobs[0].completed);

        // The poll bumped updated_at: back inside the real cooldown.
        t.set_gemini_cooldown(600);
        assert!(!t.service.run_next_gemini_status_job().await.unwrap());

        t.set_gemini_cooldown(0);
        t.gemini.set_status(GeminiTxStatus::Completed);
        assert!(t.service.run_next_gemini_status_job().await.unwrap());
        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Complete);
        assert!(jobs[0].completed);
    }

    #[tokio::test]
    async fn gemini_not_found_fails_with_note() {
        let mut t = TestService::new();
        t.set_gemini_cooldown(0);
        let promotion = ads_promotion_with_issuer(&t, "pk-1");
        let wallet = seed_wallet(&t.service, Some(DepositProvider::Gemini));
        claimed_wallet(&t, &promotion, wallet, "30");
        let batch_id = t
            .service
            .drain(&bindings_for("pk-1", 1), wallet)
            .await
            .unwrap();
        assert!(t.service.run_next_drain_job().await.unwrap());

        t.gemini.set_status(GeminiTxStatus::NotFound);
        assert!(t.service.run_next_gemini_status_job().await.unwrap());

        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Failed);
        assert_eq!(jobs[0].errcode.as_deref(), Some("GEMINI_NOT_FOUND"));
    }

    #[tokio::test]
    async fn gemini_failed_status_carries_the_reason() {
        let mut t = TestService::new();
        t.set_gemini_cooldown(0);
        let promotion = ads_promotion_with_issuer(&t, "pk-1");
        let wallet = seed_wallet(&t.service, Some(DepositProvider::Gemini));
        claimed_wallet(&t, &promotion, wallet, "30");
        let batch_id = t
            .service
            .drain(&bindings_for("pk-1", 1), wallet)
            .await
            .unwrap();
        assert!(t.service.run_next_drain_job().await.unwrap());

        t.gemini.set_status(GeminiTxStatus::Failed("compliance_hold".into()));
        assert!(t.service.run_next_gemini_status_job().await.unwrap());

        let jobs = t.service.store.drain_jobs_in_batch(&batch_id).unwrap();
        assert_eq!(jobs[0].status, DrainStatus::Failed);
        assert_eq!(jobs[0].errcode.as_deref(), Some("compliance_hold"));
    }
}
