//! Wallet records as consumed from the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::WalletId;

/// Payout backends a wallet can be linked to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositProvider {
    Uphold,
    Bitflyer,
    Gemini,
    /// Brave's own mint path: value is re-minted as a claim on the deposit
    /// account rather than transferred out.
    Brave,
}

impl DepositProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositProvider::Uphold => "uphold",
            DepositProvider::Bitflyer => "bitflyer",
            DepositProvider::Gemini => "gemini",
            DepositProvider::Brave => "brave",
        }
    }
}

impl fmt::Display for DepositProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uphold" => Ok(DepositProvider::Uphold),
            "bitflyer" => Ok(DepositProvider::Bitflyer),
            "gemini" => Ok(DepositProvider::Gemini),
            "brave" => Ok(DepositProvider::Brave),
            other => Err(format!("unknown deposit provider: {other}")),
        }
    }
}

/// The registry row the engine consumes. The registry itself is an external
/// collaborator; the service keeps a copy for signature verification and
/// payout routing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    /// Hex-encoded Ed25519 key the wallet signs requests with.
    pub public_key: String,
    /// Custodial account the wallet's value drains to; empty until linked.
    pub deposit_destination: String,
    pub deposit_provider: Option<DepositProvider>,
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    /// A wallet may only drain once it is linked to a payout target.
    pub fn linked(&self) -> bool {
        !self.deposit_destination.is_empty() && self.deposit_provider.is_some()
    }
}
