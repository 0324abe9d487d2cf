//! Environment configuration.

use anyhow::{bail, Context};
use grantd_core::PromotionId;
use grantd_engine::ServiceConfig;

/// Everything grantd reads from the environment. Loaded once at startup;
/// missing required values outside `local` abort the boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    /// Promotions excluded from wallet earnings summaries.
    pub transfer_promotion_ids: Vec<PromotionId>,
    pub enable_drains: bool,
    pub reputation_on_drain: bool,
    pub reputation_withdrawal_on_drain: bool,

    pub kafka_brokers: String,

    pub cb_server: String,
    pub reputation_server: String,
    pub reputation_token: String,

    pub uphold_server: String,
    pub grant_wallet_public_key: String,
    pub grant_wallet_private_key: String,
    pub grant_wallet_card_id: String,

    pub bitflyer_server: String,
    pub bitflyer_client_id: String,
    pub bitflyer_client_secret: String,
    pub bitflyer_source_from: String,

    pub gemini_server: String,
    pub gemini_client_id: String,
    pub gemini_api_key: String,
    pub gemini_settlement_address: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = env_or("ENV", "local");

        let transfer_promotion_ids = env_or("BRAVE_TRANSFER_PROMOTION_IDS", "")
            .split_whitespace()
            .map(|raw| {
                raw.parse()
                    .with_context(|| format!("bad promotion id in BRAVE_TRANSFER_PROMOTION_IDS: {raw}"))
            })
            .collect::<anyhow::Result<Vec<PromotionId>>>()?;

        let config = Self {
            transfer_promotion_ids,
            enable_drains: env_bool("ENABLE_LINKING_DRAINING", true),
            reputation_on_drain: env_bool("REPUTATION_ON_DRAIN", false),
            reputation_withdrawal_on_drain: env_bool("REPUTATION_WITHDRAWAL_ON_DRAIN", false),
            kafka_brokers: env_or("KAFKA_BROKERS", ""),
            cb_server: env_or("CB_SERVER", "http://127.0.0.1:2416"),
            reputation_server: env_or("REPUTATION_SERVER", "http://127.0.0.1:2417"),
            reputation_token: env_or("REPUTATION_TOKEN", ""),
            uphold_server: env_or("UPHOLD_SERVER", "https://api-sandbox.uphold.com"),
            grant_wallet_public_key: env_or("GRANT_WALLET_PUBLIC_KEY", ""),
            grant_wallet_private_key: env_or("GRANT_WALLET_PRIVATE_KEY", ""),
            grant_wallet_card_id: env_or("GRANT_WALLET_CARD_ID", ""),
            bitflyer_server: env_or("BITFLYER_SERVER", "https://bitflyer.com"),
            bitflyer_client_id: env_or("BITFLYER_CLIENT_ID", ""),
            bitflyer_client_secret: env_or("BITFLYER_CLIENT_SECRET", ""),
            bitflyer_source_from: env_or("BITFLYER_SOURCE_FROM", "self"),
            gemini_server: env_or("GEMINI_SERVER", "https://api.gemini.com"),
            gemini_client_id: env_or("GEMINI_CLIENT_ID", ""),
            gemini_api_key: env_or("GEMINI_API_KEY", ""),
            gemini_settlement_address: env_or("GEMINI_SETTLEMENT_ADDRESS", "settlement"),
            environment,
        };

        // The hot wallet is indispensable anywhere real money moves.
        if config.environment != "local"
            && (config.grant_wallet_public_key.is_empty()
                || config.grant_wallet_private_key.is_empty()
                || config.grant_wallet_card_id.is_empty())
        {
            bail!("GRANT_WALLET_PUBLIC_KEY, GRANT_WALLET_PRIVATE_KEY and GRANT_WALLET_CARD_ID are required outside local");
        }
        Ok(config)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            environment: self.environment.clone(),
            reputation_on_drain: self.reputation_on_drain,
            reputation_withdrawal_on_drain: self.reputation_withdrawal_on_drain,
            transfer_promotion_exclusions: self.transfer_promotion_ids.clone(),
            settlement_address: self.gemini_settlement_address.clone(),
            enable_drains: self.enable_drains,
            gemini_poll_cooldown_secs: grantd_core::GEMINI_POLL_COOLDOWN_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_and_permissive() {
        std::env::remove_var("ENV");
        let config = Config::from_env().unwrap();
        assert_eq!(config.environment, "local");
        assert!(config.enable_drains);
        assert!(!config.reputation_on_drain);
    }

    #[test]
    fn transfer_promotion_ids_are_space_separated() {
        let a = grantd_core::PromotionId::random();
        let b = grantd_core::PromotionId::random();
        std::env::set_var("BRAVE_TRANSFER_PROMOTION_IDS", format!("{a} {b}"));
        let config = Config::from_env().unwrap();
        std::env::remove_var("BRAVE_TRANSFER_PROMOTION_IDS");
        assert_eq!(config.transfer_promotion_ids, vec![a, b]);
    }
}
