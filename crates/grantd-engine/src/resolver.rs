//! Credential redemption resolver.
//!
//! Turns the opaque credential bindings a wallet presents into issuer-named
//! redemption triples, per-issuer funding-source aggregates, and a total —
//! the shared front half of both the drain and suggestion pipelines.

use std::collections::HashMap;

use grantd_core::decimal::Money;
use grantd_core::{
    deduplicate_credential_bindings, CredentialBinding, FundingSource, GrantError, Issuer,
    Promotion, RedeemCredential,
};

use crate::service::Service;

/// One funding source with the promotion it draws from.
#[derive(Clone, Debug)]
pub struct ResolvedSource {
    pub public_key: String,
    pub funding: FundingSource,
    pub promotion: Promotion,
}

#[derive(Clone, Debug)]
pub struct ResolvedCredentials {
    pub total: Money,
    pub request_creds: Vec<RedeemCredential>,
    /// In first-appearance order of the issuer public key.
    pub sources: Vec<ResolvedSource>,
}

impl Service {
    /// Resolve bindings into funding sources. Unknown issuers or promotions
    /// fail the whole call; a partially resolved drain would pay out the
    /// wrong amount.
    pub fn redeemed_credentials(
        &self,
        bindings: &[CredentialBinding],
    ) -> Result<ResolvedCredentials, GrantError> {
        let deduped = deduplicate_credential_bindings(bindings);

        let mut issuers: HashMap<String, Issuer> = HashMap::new();
        let mut promotions: HashMap<String, Promotion> = HashMap::new();
        let mut sources: Vec<ResolvedSource> = Vec::new();
        let mut total = Money::from(0);
        let mut request_creds = Vec::with_capacity(deduped.len());

        for binding in &deduped {
            let issuer = match issuers.get(&binding.public_key) {
                Some(issuer) => issuer.clone(),
                None => {
                    let issuer = self
                        .store
                        .get_issuer_by_public_key(&binding.public_key)?
                        .ok_or_else(|| GrantError::UnknownIssuer(binding.public_key.clone()))?;
                    issuers.insert(binding.public_key.clone(), issuer.clone());
                    issuer
                }
            };
            let promotion = match promotions.get(&binding.public_key) {
                Some(p) => p.clone(),
                None => {
                    let promotion = self
                        .store
                        .get_promotion(&issuer.promotion_id)?
                        .ok_or(GrantError::PromotionNotFound)?;
                    promotion.check_credential_value()?;
                    promotions.insert(binding.public_key.clone(), promotion.clone());
                    promotion
                }
            };

            let credential = RedeemCredential {
                issuer: issuer.name(),
                token_preimage: binding.token_preimage.clone(),
                signature: binding.signature.clone(),
            };
            request_creds.push(credential.clone());

            let value = promotion.credential_value();
            total += &value;
            match sources
                .iter_mut()
                .find(|s| s.public_key == binding.public_key)
            {
                Some(source) => {
                    source.funding.amount += &value;
                    source.funding.credentials.push(credential);
                }
                None => sources.push(ResolvedSource {
                    public_key: binding.public_key.clone(),
                    funding: FundingSource {
                        kind: promotion.kind,
                        promotion_id: promotion.id,
                        cohort: issuer.cohort.clone(),
                        amount: value,
                        credentials: vec![credential],
                    },
                    promotion,
                }),
            }
        }

        Ok(ResolvedCredentials {
            total,
            request_creds,
            sources,
        })
    }
}
