//! ─── Grant protocol constants ───────────────────────────────────────────────
//!
//! Values here are contractual: changing any of them changes what wallets can
//! claim and what custodians are asked to pay out.

use crate::decimal::{money, Money};
use once_cell::sync::Lazy;

// ── Credential economics ─────────────────────────────────────────────────────

/// Value of one signed credential, in BAT. Every promotion must divide to
/// exactly this (approximate_value / suggestions_per_grant); any drift means
/// the promotion row is corrupt.
pub static CREDENTIAL_VALUE: Lazy<Money> = Lazy::new(|| money("0.25"));

/// Default issuer cohort. One issuer exists per (promotion, cohort).
pub const DEFAULT_COHORT: &str = "control";

// ── Claim window ─────────────────────────────────────────────────────────────

/// Promotions auto-expire for claiming this many months after creation,
/// unless the claim was settled legacy-side or `claimable_until` overrides.
pub const PROMOTION_CLAIM_WINDOW_MONTHS: u32 = 3;

// ── Payout limits ────────────────────────────────────────────────────────────

/// Hard ceiling on the JPY value of one bulk transfer. Anything beyond this
/// stays in the batch for a later submission.
pub static JPY_TRANSFER_CAP: Lazy<Money> = Lazy::new(|| money("100000"));

// ── Worker cadence ───────────────────────────────────────────────────────────

/// Default tick interval for every scheduled job, in seconds.
pub const JOB_CADENCE_SECS: u64 = 5;

/// A job leased in a non-terminal custodian-pending state is not re-polled
/// for this long.
pub const GEMINI_POLL_COOLDOWN_SECS: i64 = 600;

/// Deadline for maintenance work detached from a request (issuer creation,
/// scheduler kicks).
pub const DETACHED_WORK_TIMEOUT_SECS: u64 = 90;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::money;

    #[test]
    fn credential_value_is_a_quarter_bat() {
        assert_eq!(*CREDENTIAL_VALUE, money("0.25"));
    }
}
