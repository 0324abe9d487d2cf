//! The mint worker.
//!
//! Finalizes the Brave deposit-provider pathway: once every drain job of a
//! batch has settled, the aggregated value is re-minted as a legacy-flagged
//! claim on one of the listed promotions for the wallet's deposit account.

use bigdecimal::Zero;
use grantd_core::decimal::Money;
use grantd_core::{GrantError, WalletId};
use tracing::{info, warn};

use crate::service::Service;

impl Service {
    pub async fn run_next_mint_drain_job(&self) -> Result<bool, GrantError> {
        let Some((job, _lease)) = self.store.lease_next_ready_mint_job()? else {
            return Ok(false);
        };

        if job.total.is_zero() {
            // Every member of the batch failed before crediting anything;
            // there is nothing to mint.
            self.store.complete_mint_job(&job.id)?;
            return Ok(true);
        }

        let wallet = self
            .store
            .get_wallet(&job.wallet_id)?
            .ok_or_else(|| GrantError::WalletNotFound(job.wallet_id.to_string()))?;
        let deposit_wallet: WalletId = wallet.deposit_destination.parse().map_err(|_| {
            GrantError::Storage(format!(
                "deposit destination of wallet {} is not a wallet id",
                job.wallet_id
            ))
        })?;

        // The unique (wallet, promotion) constraint is the idempotence
        // guard: walk the promotions until one still has room.
        for promotion_id in &job.promotion_ids {
            match self.store.create_claim(
                *promotion_id,
                deposit_wallet,
                job.total.clone(),
                Money::from(0),
                true,
            ) {
                Ok(claim) => {
                    self.store.complete_mint_job(&job.id)?;
                    info!(claim = %claim.id, wallet = %deposit_wallet, "drained value minted");
                    return Ok(true);
                }
                Err(GrantError::ClaimAlreadyExists) => continue,
                Err(err) => return Err(err),
            }
        }

        warn!(job = %job.id, "every listed promotion already carries a claim");
        self.store.fail_mint_job(&job.id, "mint_limit_exceeded")?;
        Err(GrantError::MintLimitExceeded)
    }
}
