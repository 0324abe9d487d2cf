//! Append-only audit rows written from client bug reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ClaimId, WalletId};

/// A claim the client reports as clobbered by a local wallet bug.
/// Unique on claim_id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClobberedClaim {
    pub claim_id: ClaimId,
    pub reported_at: DateTime<Utc>,
}

/// A client-reported loss of accrued value. Unique on (wallet_id, report_id).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatLossEvent {
    pub wallet_id: WalletId,
    pub report_id: u64,
    #[serde(with = "crate::decimal::serde_str")]
    pub amount: Money,
    pub platform: String,
    pub reported_at: DateTime<Utc>,
}

/// A client-reported accounting snapshot. One per wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BapReport {
    pub wallet_id: WalletId,
    #[serde(with = "crate::decimal::serde_str")]
    pub amount: Money,
    pub reported_at: DateTime<Utc>,
}
