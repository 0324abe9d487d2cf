//! Drain job rows and the payout state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{BatchId, ClaimId, PromotionId, RedeemCredential, WalletId};

// ── Status ───────────────────────────────────────────────────────────────────

/// Lifecycle of a drain job.
///
/// ```text
/// created ─→ prepared ─→ submitted ─→ complete            (terminal)
///    │            ├─→ bitflyer-consolidate ─→ submitted …
///    │            └─→ gemini-pending ─→ complete | failed
///    ├─→ failed                                           (terminal)
///    └─→ reputation-failed ─→ manual-retry ─→ prepared …
///                retry-bypass-cbr ──┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrainStatus {
    Created,
    Prepared,
    Submitted,
    Complete,
    Failed,
    GeminiPending,
    BitflyerConsolidate,
    ReputationFailed,
    RetryBypassCbr,
    ManualRetry,
}

impl DrainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainStatus::Created => "created",
            DrainStatus::Prepared => "prepared",
            DrainStatus::Submitted => "submitted",
            DrainStatus::Complete => "complete",
            DrainStatus::Failed => "failed",
            DrainStatus::GeminiPending => "gemini-pending",
            DrainStatus::BitflyerConsolidate => "bitflyer-consolidate",
            DrainStatus::ReputationFailed => "reputation-failed",
            DrainStatus::RetryBypassCbr => "retry-bypass-cbr",
            DrainStatus::ManualRetry => "manual-retry",
        }
    }

    /// Terminal states never move again.
    pub fn terminal(&self) -> bool {
        matches!(self, DrainStatus::Complete | DrainStatus::Failed)
    }

    /// Erred states a retry worker may resurrect.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            DrainStatus::ReputationFailed | DrainStatus::RetryBypassCbr | DrainStatus::ManualRetry
        )
    }
}

impl fmt::Display for DrainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => DrainStatus::Created,
            "prepared" => DrainStatus::Prepared,
            "submitted" => DrainStatus::Submitted,
            "complete" => DrainStatus::Complete,
            "failed" => DrainStatus::Failed,
            "gemini-pending" => DrainStatus::GeminiPending,
            "bitflyer-consolidate" => DrainStatus::BitflyerConsolidate,
            "reputation-failed" => DrainStatus::ReputationFailed,
            "retry-bypass-cbr" => DrainStatus::RetryBypassCbr,
            "manual-retry" => DrainStatus::ManualRetry,
            other => return Err(format!("unknown drain status: {other}")),
        })
    }
}

// ── DrainJob ─────────────────────────────────────────────────────────────────

/// One unit of "move value out of this wallet for this claim".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrainJob {
    pub id: Uuid,
    pub wallet_id: WalletId,
    /// Null when the drain was recorded against a wallet with no matching
    /// claim (inserted already-failed with a mismatched-wallet code).
    pub claim_id: Option<ClaimId>,
    pub batch_id: BatchId,
    pub credentials: Vec<RedeemCredential>,
    #[serde(with = "crate::decimal::serde_str")]
    pub total: Money,
    /// Custodian-specific transfer reference, assigned when the job is
    /// prepared (a fresh UUID for Uphold/Bitflyer, a deterministic digest
    /// for Gemini).
    pub transaction_id: Option<String>,
    pub deposit_destination: Option<String>,
    pub status: DrainStatus,
    pub erred: bool,
    pub errcode: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DrainJob {
    /// Whether the given transition is legal. A completed job never moves;
    /// terminal statuses never move; erred-but-movable statuses only move
    /// through the retry path.
    pub fn may_transition_to(&self, next: DrainStatus) -> bool {
        if self.completed || self.status.terminal() {
            return false;
        }
        match self.status {
            DrainStatus::Created => matches!(
                next,
                DrainStatus::Prepared
                    | DrainStatus::Failed
                    | DrainStatus::ReputationFailed
                    | DrainStatus::RetryBypassCbr
            ),
            DrainStatus::Prepared => matches!(
                next,
                DrainStatus::Submitted
                    | DrainStatus::BitflyerConsolidate
                    | DrainStatus::GeminiPending
                    | DrainStatus::Complete
                    | DrainStatus::Failed
            ),
            DrainStatus::BitflyerConsolidate => {
                matches!(next, DrainStatus::Submitted | DrainStatus::Failed)
            }
            DrainStatus::GeminiPending => {
                matches!(next, DrainStatus::Complete | DrainStatus::Failed)
            }
            DrainStatus::Submitted => {
                matches!(next, DrainStatus::Complete | DrainStatus::Failed)
            }
            DrainStatus::ReputationFailed => matches!(next, DrainStatus::ManualRetry),
            DrainStatus::RetryBypassCbr | DrainStatus::ManualRetry => matches!(
                next,
                DrainStatus::Prepared
                    | DrainStatus::Failed
                    | DrainStatus::ReputationFailed
                    | DrainStatus::RetryBypassCbr
            ),
            DrainStatus::Complete | DrainStatus::Failed => false,
        }
    }
}

// ── MintDrainJob ─────────────────────────────────────────────────────────────

/// Aggregate for the Brave deposit-provider pathway: once every credential
/// attributed to the listed promotions has been redeemed, a new
/// legacy-flagged claim is minted to the wallet's deposit account at the
/// accumulated amount.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintDrainJob {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub batch_id: BatchId,
    pub promotion_ids: Vec<PromotionId>,
    #[serde(with = "crate::decimal::serde_str")]
    pub total: Money,
    pub erred: bool,
    pub errcode: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
