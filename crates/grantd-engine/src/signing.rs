//! The signing worker.
//!
//! Pulls at most one credential row still waiting on the issuer, asks the
//! external signer for the batch, and writes the result back exactly once.
//! Any issuer error fails the attempt; the scheduler simply retries on its
//! next tick.

use grantd_core::GrantError;
use grantd_store::claims::SigningOutcome;
use tracing::debug;

use crate::service::Service;

impl Service {
    pub async fn run_next_signing_job(&self) -> Result<bool, GrantError> {
        let Some((creds, _lease)) = self.store.lease_next_unsigned_creds()? else {
            return Ok(false);
        };
        let issuer = self
            .store
            .get_issuer_by_id(&creds.issuer_id)?
            .ok_or_else(|| {
                GrantError::Storage(format!("issuer {} missing for claim creds", creds.issuer_id))
            })?;

        let signed = self
            .issuer_client
            .sign_credentials(&issuer.name(), &creds.blinded_creds)
            .await?;

        match self.store.finish_signing(
            &creds.claim_id,
            signed.signed_creds,
            signed.batch_proof,
            signed.public_key,
        )? {
            SigningOutcome::Written => {
                debug!(claim = %creds.claim_id, "credentials signed");
            }
            SigningOutcome::AlreadySigned => {
                // A concurrent worker got there first; its write stands and
                // this attempt still counts as done.
                debug!(claim = %creds.claim_id, "credentials already signed");
            }
        }
        Ok(true)
    }
}
