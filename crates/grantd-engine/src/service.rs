//! Service construction and promotion administration.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use grantd_core::decimal::Money;
use grantd_core::{GrantError, Issuer, Promotion, PromotionId, PromotionType, DEFAULT_COHORT};
use grantd_sched::SchedulerHandle;
use grantd_store::Store;
use tracing::info;
use uuid::Uuid;

use crate::collab::{CredentialIssuer, ReputationOracle};
use crate::custodian::{BitflyerApi, GeminiApi, UpholdApi};
use crate::events::{EventTopic, Topics};
use crate::metrics::Metrics;

/// Service-level configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Deployment environment; prefixes topic names and gates auth checks.
    pub environment: String,
    /// Gate the drain path on the reputation oracle.
    pub reputation_on_drain: bool,
    /// Additionally enforce per-promotion withdrawal limits on drain.
    pub reputation_withdrawal_on_drain: bool,
    /// Promotions excluded from wallet earnings summaries.
    pub transfer_promotion_exclusions: Vec<PromotionId>,
    /// Settlement account the Gemini transfer reference is derived from.
    pub settlement_address: String,
    /// Master gate for the drain pathway.
    pub enable_drains: bool,
    /// How long a custodian-pending transfer stays out of the poll window
    /// after each poll.
    pub gemini_poll_cooldown_secs: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "local".into(),
            reputation_on_drain: false,
            reputation_withdrawal_on_drain: false,
            transfer_promotion_exclusions: Vec::new(),
            settlement_address: "settlement".into(),
            enable_drains: true,
            gemini_poll_cooldown_secs: grantd_core::GEMINI_POLL_COOLDOWN_SECS,
        }
    }
}

/// The collaborator set the engine talks to.
pub struct Clients {
    pub issuer: Arc<dyn CredentialIssuer>,
    pub reputation: Arc<dyn ReputationOracle>,
    pub uphold: Arc<dyn UpholdApi>,
    pub bitflyer: Arc<dyn BitflyerApi>,
    pub gemini: Arc<dyn GeminiApi>,
    pub events: Arc<dyn EventTopic>,
}

/// The grant lifecycle engine. One value per process, shared by the HTTP
/// layer and every scheduled worker.
pub struct Service {
    pub store: Arc<Store>,
    pub(crate) issuer_client: Arc<dyn CredentialIssuer>,
    pub(crate) reputation: Arc<dyn ReputationOracle>,
    pub(crate) uphold: Arc<dyn UpholdApi>,
    pub(crate) bitflyer: Arc<dyn BitflyerApi>,
    pub(crate) gemini: Arc<dyn GeminiApi>,
    pub(crate) events: Arc<dyn EventTopic>,
    pub topics: Topics,
    pub metrics: Metrics,
    pub config: ServiceConfig,
    pub scheduler: SchedulerHandle,
    /// Suggestion emission is throttled until this instant when the event
    /// topic signals back-pressure.
    pub(crate) pause_until: RwLock<Option<Instant>>,
}

impl Service {
    pub fn new(
        store: Arc<Store>,
        clients: Clients,
        config: ServiceConfig,
        metrics: Metrics,
        scheduler: SchedulerHandle,
    ) -> Self {
        let topics = Topics::new(&config.environment);
        Self {
            store,
            issuer_client: clients.issuer,
            reputation: clients.reputation,
            uphold: clients.uphold,
            bitflyer: clients.bitflyer,
            gemini: clients.gemini,
            events: clients.events,
            topics,
            metrics,
            config,
            scheduler,
            pause_until: RwLock::new(None),
        }
    }

    // ── Promotion administration ─────────────────────────────────────────────

    /// Create a promotion. `value` is per grant for `ugp` and the pool total
    /// for `ads`; either way it must divide by `suggestions_per_grant` to
    /// the fixed credential value, which is verified before the row lands.
    pub fn create_promotion(
        &self,
        kind: PromotionType,
        num_grants: u64,
        value: Money,
        suggestions_per_grant: u64,
        platform: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Promotion, GrantError> {
        let now = Utc::now();
        let promotion = Promotion {
            id: PromotionId::random(),
            created_at: now,
            expires_at: expires_at.unwrap_or(now + Duration::days(120)),
            kind,
            platform,
            approximate_value: value,
            suggestions_per_grant,
            remaining_grants: num_grants,
            active: false,
            public_keys: Vec::new(),
            claimable_until: None,
        };
        promotion.check_credential_value()?;
        self.store.put_promotion(&promotion)?;
        info!(id = %promotion.id, kind = %promotion.kind, "promotion created");
        Ok(promotion)
    }

    /// Activate a promotion and nudge the issuer job so its signing key
    /// exists before the first claim arrives. The kick is advisory; the job
    /// also finds the promotion on its own cadence.
    pub fn activate_promotion(&self, id: &PromotionId) -> Result<(), GrantError> {
        self.store.set_promotion_active(id, true)?;
        self.scheduler.kick(crate::jobs::PROMOTION_MISSING_ISSUER);
        Ok(())
    }

    // ── Issuers ──────────────────────────────────────────────────────────────

    /// Get or create the issuer for (promotion, cohort), registering it with
    /// the external signer on first use.
    pub async fn ensure_issuer(
        &self,
        promotion: &Promotion,
        cohort: &str,
    ) -> Result<Issuer, GrantError> {
        if let Some(issuer) = self.store.get_issuer(&promotion.id, cohort)? {
            return Ok(issuer);
        }
        let name = format!("{}:{}", promotion.id, cohort);
        self.issuer_client
            .create_issuer(&name, promotion.suggestions_per_grant)
            .await?;
        let public_key = self.issuer_client.issuer_public_key(&name).await?;
        let issuer = Issuer {
            id: Uuid::new_v4(),
            promotion_id: promotion.id,
            cohort: cohort.to_string(),
            public_key: public_key.clone(),
            created_at: Utc::now(),
        };
        self.store.put_issuer(&issuer)?;

        let mut fresh = self
            .store
            .get_promotion(&promotion.id)?
            .ok_or(GrantError::PromotionNotFound)?;
        if !fresh.public_keys.contains(&public_key) {
            fresh.public_keys.push(public_key);
            self.store.put_promotion(&fresh)?;
        }
        info!(promotion = %promotion.id, cohort, "issuer created");
        Ok(issuer)
    }

    /// One pass of the missing-issuer sweep: repair at most one promotion.
    pub async fn run_next_promotion_missing_issuer_job(&self) -> Result<bool, GrantError> {
        let missing = self.store.promotions_missing_issuer(DEFAULT_COHORT)?;
        let Some(promotion) = missing.into_iter().next() else {
            return Ok(false);
        };
        self.ensure_issuer(&promotion, DEFAULT_COHORT).await?;
        Ok(true)
    }

    // ── Suggestion throttle ──────────────────────────────────────────────────

    pub(crate) fn paused(&self) -> bool {
        let pause = self.pause_until.read().unwrap_or_else(|e| e.into_inner());
        matches!(*pause, Some(until) if Instant::now() < until)
    }

    pub(crate) fn pause_for(&self, duration: std::time::Duration) {
        let mut pause = self.pause_until.write().unwrap_or_else(|e| e.into_inner());
        *pause = Some(Instant::now() + duration);
    }
}
