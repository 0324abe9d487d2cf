//! Monetary arithmetic.
//!
//! All amounts are arbitrary-precision decimals; monetary math never touches
//! floating point. On the wire and in storage, amounts serialize as decimal
//! strings via the [`serde_str`] adapter so that both JSON and bincode
//! round-trip exactly.

use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;

/// A BAT (or JPY) amount. Alias to keep signatures readable.
pub type Money = BigDecimal;

/// Parse a decimal literal. Panics on malformed input, so only use with
/// constants known at compile time.
pub fn money(literal: &str) -> Money {
    BigDecimal::from_str(literal).expect("valid decimal literal")
}

/// Round to whole units, half away from zero.
pub fn round_units(v: &Money) -> Money {
    v.with_scale_round(0, RoundingMode::HalfUp)
}

/// Truncate to BAT precision (8 decimal places) before handing an amount to
/// a custodian.
pub fn floor_bat(v: &Money) -> Money {
    v.with_scale_round(8, RoundingMode::Floor)
}

// ── Serde adapter ────────────────────────────────────────────────────────────

pub mod serde_str {
    use bigdecimal::BigDecimal;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &BigDecimal, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigDecimal, D::Error> {
        let raw = String::deserialize(d)?;
        BigDecimal::from_str(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Row {
        #[serde(with = "serde_str")]
        amount: Money,
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_units(&money("2.4")), money("2"));
        assert_eq!(round_units(&money("2.5")), money("3"));
        assert_eq!(round_units(&money("0.2")), money("0"));
    }

    #[test]
    fn floor_truncates_to_bat_precision() {
        assert_eq!(floor_bat(&money("0.123456789")), money("0.12345678"));
        assert_eq!(floor_bat(&money("0.25")), money("0.25"));
    }

    #[test]
    fn string_adapter_round_trips_through_bincode() {
        let row = Row { amount: money("0.25") };
        let bytes = bincode::serialize(&row).unwrap();
        let back: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn string_adapter_round_trips_through_json() {
        let row = Row { amount: money("30.05") };
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"amount":"30.05"}"#);
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(row, back);
    }
}
