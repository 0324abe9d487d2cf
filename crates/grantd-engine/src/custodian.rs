//! Custodian payout backends.
//!
//! Per-custodian quirks (the JPY ceiling, token refresh, status polling,
//! mint aggregation) live behind these contracts; the drain worker only
//! decides which capability to exercise.

use async_trait::async_trait;
use grantd_core::decimal::Money;
use grantd_core::GrantError;

/// Uphold: an immediate hot-wallet transfer, settled synchronously.
#[async_trait]
pub trait UpholdApi: Send + Sync {
    async fn transfer(
        &self,
        destination: &str,
        amount: &Money,
        transfer_id: &str,
    ) -> Result<(), GrantError>;
}

/// One line of a Bitflyer bulk payout.
#[derive(Clone, Debug)]
pub struct BitflyerWithdrawal {
    pub transfer_id: String,
    pub amount: Money,
    pub deposit_id: String,
}

/// Result line of a Bitflyer bulk payout.
#[derive(Clone, Debug)]
pub struct BitflyerWithdrawResult {
    pub transfer_id: String,
    pub status: String,
}

impl BitflyerWithdrawResult {
    /// Whether the custodian categorizes this status as a failure.
    pub fn failed(&self) -> bool {
        !matches!(self.status.as_str(), "SUCCESS" | "EXECUTED" | "CREATED" | "PENDING")
    }
}

/// Bitflyer: batched bulk payouts priced in JPY. Auth tokens expire and the
/// caller is expected to refresh-and-retry once on an unauthorized response
/// ([`GrantError::CustodianUnauthorized`]).
#[async_trait]
pub trait BitflyerApi: Send + Sync {
    /// Current BAT→JPY rate.
    async fn fetch_quote(&self) -> Result<Money, GrantError>;

    async fn refresh_token(&self) -> Result<(), GrantError>;

    async fn upload_bulk_payout(
        &self,
        withdrawals: &[BitflyerWithdrawal],
    ) -> Result<Vec<BitflyerWithdrawResult>, GrantError>;
}

/// One line of a Gemini bulk payout.
#[derive(Clone, Debug)]
pub struct GeminiPayout {
    pub tx_ref: String,
    pub amount: Money,
    pub destination: String,
}

/// Settlement status of one Gemini payout line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeminiTxStatus {
    Completed,
    Pending,
    Processing,
    Failed(String),
    /// The provider has no record of the reference (HTTP 404).
    NotFound,
}

/// Gemini: bulk payouts settled asynchronously, polled by reference.
#[async_trait]
pub trait GeminiApi: Send + Sync {
    async fn upload_payout(&self, payout: &GeminiPayout) -> Result<(), GrantError>;

    async fn check_status(&self, tx_ref: &str) -> Result<GeminiTxStatus, GrantError>;
}

/// Deterministic Gemini transfer reference. Replays of the same drain hash
/// to the same reference, so the custodian deduplicates instead of paying
/// twice.
pub fn gemini_tx_ref(settlement_id: &str, kind: &str, destination: &str, channel: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(settlement_id.as_bytes());
    hasher.update(kind.as_bytes());
    hasher.update(destination.as_bytes());
    hasher.update(channel.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_ref_is_deterministic_and_input_sensitive() {
        let a = gemini_tx_ref("settle-1", "drain", "dest-1", "wallet");
        let b = gemini_tx_ref("settle-1", "drain", "dest-1", "wallet");
        let c = gemini_tx_ref("settle-1", "drain", "dest-2", "wallet");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn bitflyer_status_categorization() {
        let ok = BitflyerWithdrawResult {
            transfer_id: "t".into(),
            status: "SUCCESS".into(),
        };
        assert!(!ok.failed());
        let no_inv = BitflyerWithdrawResult {
            transfer_id: "t".into(),
            status: "NO_INV".into(),
        };
        assert!(no_inv.failed());
    }
}
