//! Scripted collaborators and a fully wired in-memory service for tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use grantd_core::decimal::{money, Money};
use grantd_core::{
    CredentialBinding, DepositProvider, GrantError, Issuer, Promotion, PromotionId, PromotionType,
    RedeemCredential, WalletId, WalletRecord,
};
use grantd_sched::SchedulerHandle;
use grantd_store::Store;
use uuid::Uuid;

use crate::collab::{CredentialIssuer, DrainReputability, ReputationOracle, SignedCreds};
use crate::custodian::{
    BitflyerApi, BitflyerWithdrawResult, BitflyerWithdrawal, GeminiApi, GeminiPayout,
    GeminiTxStatus, UpholdApi,
};
use crate::events::MemoryTopic;
use crate::metrics::Metrics;
use crate::service::{Clients, Service, ServiceConfig};

// ── Issuer ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockIssuer {
    fail_next_sign: AtomicBool,
    fail_next_redeem_dup: AtomicBool,
    redeemed: Mutex<Vec<Vec<RedeemCredential>>>,
}

impl MockIssuer {
    pub fn fail_next_sign(&self) {
        self.fail_next_sign.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_redeem_as_duplicate(&self) {
        self.fail_next_redeem_dup.store(true, Ordering::SeqCst);
    }

    pub fn redeemed_batches(&self) -> usize {
        self.redeemed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CredentialIssuer for MockIssuer {
    async fn create_issuer(&self, _name: &str, _max_tokens: u64) -> Result<(), GrantError> {
        Ok(())
    }

    async fn issuer_public_key(&self, name: &str) -> Result<String, GrantError> {
        Ok(format!("issuer-pk-{name}"))
    }

    async fn sign_credentials(
        &self,
        _issuer_name: &str,
        blinded_creds: &[String],
    ) -> Result<SignedCreds, GrantError> {
        if self.fail_next_sign.swap(false, Ordering::SeqCst) {
            return Err(GrantError::Issuer("signer unavailable".into()));
        }
        Ok(SignedCreds {
            signed_creds: blinded_creds.iter().map(|b| format!("signed:{b}")).collect(),
            batch_proof: "batch-proof".into(),
            public_key: "signing-key".into(),
        })
    }

    async fn redeem_credentials(
        &self,
        credentials: &[RedeemCredential],
        _payload: &str,
    ) -> Result<(), GrantError> {
        self.redeemed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(credentials.to_vec());
        if self.fail_next_redeem_dup.swap(false, Ordering::SeqCst) {
            return Err(GrantError::DuplicateCredentialRedemption);
        }
        Ok(())
    }
}

// ── Reputation ───────────────────────────────────────────────────────────────

pub struct MockReputation {
    reputable: AtomicBool,
    on_platform: AtomicBool,
    ads_reputable: AtomicBool,
    drain_result: Mutex<DrainReputability>,
}

impl Default for MockReputation {
    fn default() -> Self {
        Self {
            reputable: AtomicBool::new(true),
            on_platform: AtomicBool::new(true),
            ads_reputable: AtomicBool::new(true),
            drain_result: Mutex::new(DrainReputability::Reputable),
        }
    }
}

impl MockReputation {
    pub fn set_reputable(&self, v: bool) {
        self.reputable.store(v, Ordering::SeqCst);
    }

    pub fn set_on_platform(&self, v: bool) {
        self.on_platform.store(v, Ordering::SeqCst);
    }

    pub fn set_ads_reputable(&self, v: bool) {
        self.ads_reputable.store(v, Ordering::SeqCst);
    }

    pub fn set_drain_result(&self, v: DrainReputability) {
        *self.drain_result.lock().unwrap_or_else(|e| e.into_inner()) = v;
    }
}

#[async_trait]
impl ReputationOracle for MockReputation {
    async fn is_wallet_reputable(
        &self,
        _wallet_id: WalletId,
        _platform: &str,
    ) -> Result<bool, GrantError> {
        Ok(self.reputable.load(Ordering::SeqCst))
    }

    async fn is_wallet_on_platform(
        &self,
        _wallet_id: WalletId,
        _platform: &str,
    ) -> Result<bool, GrantError> {
        Ok(self.on_platform.load(Ordering::SeqCst))
    }

    async fn is_wallet_ads_reputable(&self, _wallet_id: WalletId) -> Result<bool, GrantError> {
        Ok(self.ads_reputable.load(Ordering::SeqCst))
    }

    async fn is_drain_reputable(
        &self,
        _wallet_id: WalletId,
        _promotion_id: PromotionId,
        _withdrawn_so_far: &Money,
    ) -> Result<DrainReputability, GrantError> {
        Ok(*self.drain_result.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

// ── Custodians ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockUphold {
    transfers: Mutex<Vec<(String, Money, String)>>,
}

impl MockUphold {
    pub fn transfers(&self) -> usize {
        self.transfers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl UpholdApi for MockUphold {
    async fn transfer(
        &self,
        destination: &str,
        amount: &Money,
        transfer_id: &str,
    ) -> Result<(), GrantError> {
        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((destination.to_string(), amount.clone(), transfer_id.to_string()));
        Ok(())
    }
}

pub struct MockBitflyer {
    quote: Mutex<Money>,
    fail_next_quote: AtomicBool,
    refreshes: AtomicUsize,
    withdraw_status: Mutex<String>,
    empty_response: AtomicBool,
    uploads: Mutex<Vec<BitflyerWithdrawal>>,
}

impl Default for MockBitflyer {
    fn default() -> Self {
        Self {
            quote: Mutex::new(money("100")),
            fail_next_quote: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            withdraw_status: Mutex::new("SUCCESS".into()),
            empty_response: AtomicBool::new(false),
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl MockBitflyer {
    pub fn set_quote(&self, rate: Money) {
        *self.quote.lock().unwrap_or_else(|e| e.into_inner()) = rate;
    }

    pub fn fail_next_quote_unauthorized(&self) {
        self.fail_next_quote.store(true, Ordering::SeqCst);
    }

    pub fn set_withdraw_status(&self, status: &str) {
        *self.withdraw_status.lock().unwrap_or_else(|e| e.into_inner()) = status.to_string();
    }

    pub fn set_empty_response(&self) {
        self.empty_response.store(true, Ordering::SeqCst);
    }

    pub fn token_refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<BitflyerWithdrawal> {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BitflyerApi for MockBitflyer {
    async fn fetch_quote(&self) -> Result<Money, GrantError> {
        if self.fail_next_quote.swap(false, Ordering::SeqCst) {
            return Err(GrantError::CustodianUnauthorized);
        }
        Ok(self.quote.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn refresh_token(&self) -> Result<(), GrantError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_bulk_payout(
        &self,
        withdrawals: &[BitflyerWithdrawal],
    ) -> Result<Vec<BitflyerWithdrawResult>, GrantError> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(withdrawals.iter().cloned());
        if self.empty_response.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let status = self
            .withdraw_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(withdrawals
            .iter()
            .map(|w| BitflyerWithdrawResult {
                transfer_id: w.transfer_id.clone(),
                status: status.clone(),
            })
            .collect())
    }
}

pub struct MockGemini {
    status: Mutex<GeminiTxStatus>,
    uploads: Mutex<Vec<String>>,
}

impl Default for MockGemini {
    fn default() -> Self {
        Self {
            status: Mutex::new(GeminiTxStatus::Pending),
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl MockGemini {
    pub fn set_status(&self, status: GeminiTxStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl GeminiApi for MockGemini {
    async fn upload_payout(&self, payout: &GeminiPayout) -> Result<(), GrantError> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payout.tx_ref.clone());
        Ok(())
    }

    async fn check_status(&self, _tx_ref: &str) -> Result<GeminiTxStatus, GrantError> {
        Ok(self.status.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

// ── Wired service ────────────────────────────────────────────────────────────

pub struct TestService {
    pub service: Service,
    pub issuer: Arc<MockIssuer>,
    pub reputation: Arc<MockReputation>,
    pub uphold: Arc<MockUphold>,
    pub bitflyer: Arc<MockBitflyer>,
    pub gemini: Arc<MockGemini>,
    pub topic: Arc<MemoryTopic>,
    dir: PathBuf,
}

impl TestService {
    pub fn new() -> Self {
        Self::build(ServiceConfig::default(), 64)
    }

    pub fn with_topic_capacity(capacity: usize) -> Self {
        Self::build(ServiceConfig::default(), capacity)
    }

    fn build(config: ServiceConfig, topic_capacity: usize) -> Self {
        let dir = std::env::temp_dir().join(format!("grantd-engine-test-{}", Uuid::new_v4()));
        let store = Arc::new(Store::open(&dir).expect("open temp store"));
        let issuer = Arc::new(MockIssuer::default());
        let reputation = Arc::new(MockReputation::default());
        let uphold = Arc::new(MockUphold::default());
        let bitflyer = Arc::new(MockBitflyer::default());
        let gemini = Arc::new(MockGemini::default());
        let topic = Arc::new(MemoryTopic::new(topic_capacity));
        let service = Service::new(
            store,
            Clients {
                issuer: issuer.clone(),
                reputation: reputation.clone(),
                uphold: uphold.clone(),
                bitflyer: bitflyer.clone(),
                gemini: gemini.clone(),
                events: topic.clone(),
            },
            config,
            Metrics::unregistered(),
            SchedulerHandle::default(),
        );
        Self {
            service,
            issuer,
            reputation,
            uphold,
            bitflyer,
            gemini,
            topic,
            dir,
        }
    }

    pub fn set_transfer_exclusions(&mut self, ids: Vec<PromotionId>) {
        self.service.config.transfer_promotion_exclusions = ids;
    }

    pub fn set_reputation_on_drain(&mut self, on: bool, withdrawal_limits: bool) {
        self.service.config.reputation_on_drain = on;
        self.service.config.reputation_withdrawal_on_drain = withdrawal_limits;
    }

    pub fn set_gemini_cooldown(&mut self, secs: i64) {
        self.service.config.gemini_poll_cooldown_secs = secs;
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn blinded(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("blinded-{i}")).collect()
}

/// A wallet row, linked to `provider` when given.
pub fn seed_wallet(service: &Service, provider: Option<DepositProvider>) -> WalletId {
    let id = WalletId::random();
    let deposit_destination = match provider {
        // Brave deposit destinations are themselves wallet ids.
        Some(DepositProvider::Brave) => WalletId::random().to_string(),
        Some(_) => format!("dest-{id}"),
        None => String::new(),
    };
    let wallet = WalletRecord {
        id,
        public_key: "00".repeat(32),
        deposit_destination,
        deposit_provider: provider,
        created_at: Utc::now(),
    };
    service.store.put_wallet(&wallet).expect("seed wallet");
    id
}

/// An active ads promotion (0.25 per credential) with an issuer registered
/// under `public_key`.
pub fn ads_promotion_with_issuer(t: &TestService, public_key: &str) -> Promotion {
    let now = Utc::now();
    let promotion = Promotion {
        id: PromotionId::random(),
        created_at: now,
        expires_at: now + Duration::days(90),
        kind: PromotionType::Ads,
        platform: String::new(),
        approximate_value: money("25"),
        suggestions_per_grant: 100,
        remaining_grants: 0,
        active: true,
        public_keys: vec![public_key.to_string()],
        claimable_until: None,
    };
    t.service.store.put_promotion(&promotion).expect("seed promotion");
    let issuer = Issuer {
        id: Uuid::new_v4(),
        promotion_id: promotion.id,
        cohort: "control".into(),
        public_key: public_key.to_string(),
        created_at: now,
    };
    t.service.store.put_issuer(&issuer).expect("seed issuer");
    promotion
}

/// Give `wallet` a claim worth `value` on `promotion`.
pub fn claimed_wallet(t: &TestService, promotion: &Promotion, wallet: WalletId, value: &str) {
    t.service
        .store
        .create_claim(promotion.id, wallet, money(value), money("0"), false)
        .expect("seed claim");
}

/// `n` credential bindings under `public_key` with unique preimages.
pub fn bindings_for(public_key: &str, n: usize) -> Vec<CredentialBinding> {
    (0..n)
        .map(|i| CredentialBinding {
            public_key: public_key.to_string(),
            token_preimage: format!("{public_key}-{}-{i}", Uuid::new_v4()),
            signature: format!("sig-{i}"),
        })
        .collect()
}
