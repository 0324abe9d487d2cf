//! External collaborator contracts.
//!
//! The engine is written against these traits; `grantd-clients` provides the
//! HTTP implementations and tests substitute scripted ones.

use async_trait::async_trait;
use grantd_core::decimal::Money;
use grantd_core::{GrantError, PromotionId, RedeemCredential, WalletId};

/// What the external issuer returns for one batch of blinded credentials.
#[derive(Clone, Debug)]
pub struct SignedCreds {
    pub signed_creds: Vec<String>,
    pub batch_proof: String,
    pub public_key: String,
}

/// The blinded-credential issuer ("CB"): registers issuers, signs blinded
/// credential batches, and redeems presented credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Register an issuer by name; idempotent upstream.
    async fn create_issuer(&self, name: &str, max_tokens: u64) -> Result<(), GrantError>;

    /// The issuer's signing public key.
    async fn issuer_public_key(&self, name: &str) -> Result<String, GrantError>;

    /// Sign a batch of blinded credentials under `issuer_name`.
    async fn sign_credentials(
        &self,
        issuer_name: &str,
        blinded_creds: &[String],
    ) -> Result<SignedCreds, GrantError>;

    /// Redeem credentials, binding them to `payload`. A replay of an earlier
    /// redemption must surface as
    /// [`GrantError::DuplicateCredentialRedemption`] so retries can bypass it.
    async fn redeem_credentials(
        &self,
        credentials: &[RedeemCredential],
        payload: &str,
    ) -> Result<(), GrantError>;
}

/// Outcome of a drain-time reputation check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainReputability {
    Reputable,
    NotReputable,
    /// The wallet sits in the withdrawal-limits cohort: reputable, but its
    /// accumulated outflow is over the line.
    WithdrawalLimits,
}

/// The reputation oracle.
#[async_trait]
pub trait ReputationOracle: Send + Sync {
    /// Whether the wallet is reputable enough to claim on `platform`.
    async fn is_wallet_reputable(
        &self,
        wallet_id: WalletId,
        platform: &str,
    ) -> Result<bool, GrantError>;

    /// Whether the wallet is registered on `platform`.
    async fn is_wallet_on_platform(
        &self,
        wallet_id: WalletId,
        platform: &str,
    ) -> Result<bool, GrantError>;

    /// Legacy drain gate: ads-reputability only.
    async fn is_wallet_ads_reputable(&self, wallet_id: WalletId) -> Result<bool, GrantError>;

    /// Drain gate with withdrawal limits: `withdrawn_so_far` is the value
    /// already moved out for this promotion across the wallet's linked
    /// provider accounts.
    async fn is_drain_reputable(
        &self,
        wallet_id: WalletId,
        promotion_id: PromotionId,
        withdrawn_so_far: &Money,
    ) -> Result<DrainReputability, GrantError>;
}
