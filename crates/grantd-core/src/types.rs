use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Entity identifiers ───────────────────────────────────────────────────────
//
// All primary identifiers are UUIDv4, wrapped in newtypes so a claim id can
// never be passed where a promotion id is expected.

/// Unique identifier of a promotion.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromotionId(pub Uuid);

/// Unique identifier of a claim.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub Uuid);

/// Wallet identifier (the `paymentId` on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub Uuid);

/// Groups drain jobs that were inserted by one drain call and are
/// submitted to a custodian together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

macro_rules! uuid_id_impls {
    ($name:ident) => {
        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id_impls!(PromotionId);
uuid_id_impls!(ClaimId);
uuid_id_impls!(WalletId);
uuid_id_impls!(BatchId);

// ── Promotion type ───────────────────────────────────────────────────────────

/// The two grant flavours. `Ugp` grants come from a shared finite pool and
/// are created on demand; `Ads` grants are pre-registered per wallet by an
/// external writer before the wallet ever calls in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionType {
    Ugp,
    Ads,
}

impl PromotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionType::Ugp => "ugp",
            PromotionType::Ads => "ads",
        }
    }
}

impl fmt::Display for PromotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ugp" => Ok(PromotionType::Ugp),
            "ads" => Ok(PromotionType::Ads),
            other => Err(format!("unknown promotion type: {other}")),
        }
    }
}

// ── Credentials on the wire ──────────────────────────────────────────────────

/// One redeemable credential as presented by a wallet: the issuer public key
/// it was signed under, the unblinded token preimage, and the signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "t")]
    pub token_preimage: String,
    pub signature: String,
}

/// The triple handed to the external redemption service: the issuer *name*
/// (resolved from the binding's public key), preimage, and signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCredential {
    pub issuer: String,
    #[serde(rename = "t")]
    pub token_preimage: String,
    pub signature: String,
}

/// Deduplicate bindings by token preimage, preserving first-occurrence order.
pub fn deduplicate_credential_bindings(bindings: &[CredentialBinding]) -> Vec<CredentialBinding> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(bindings.len());
    for b in bindings {
        if seen.insert(b.token_preimage.clone()) {
            out.push(b.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(preimage: &str) -> CredentialBinding {
        CredentialBinding {
            public_key: "pk".into(),
            token_preimage: preimage.into(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let input = vec![binding("a"), binding("b"), binding("a"), binding("c"), binding("b")];
        let out = deduplicate_credential_bindings(&input);
        let preimages: Vec<_> = out.iter().map(|b| b.token_preimage.as_str()).collect();
        assert_eq!(preimages, vec!["a", "b", "c"]);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![binding("a"), binding("b"), binding("a")];
        let once = deduplicate_credential_bindings(&input);
        let twice = deduplicate_credential_bindings(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn ids_round_trip_through_display_and_parse() {
        let id = PromotionId::random();
        let parsed: PromotionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
