use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrantError {
    // ── Claim errors ─────────────────────────────────────────────────────────
    #[error("promotion not found")]
    PromotionNotFound,

    #[error("wallet lookup failed: {0}")]
    WalletLookup(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("promotion has expired")]
    PromotionGone,

    #[error("promotion is not active")]
    PromotionDisabled,

    #[error("claim not found")]
    ClaimNotFound,

    #[error("claim already redeemed with different blinded credentials")]
    BlindedCredsMismatch,

    #[error("credential row missing for redeemed claim {0}")]
    MissingClaimCreds(String),

    #[error("wrong number of blinded credentials: expected {expected}, got {got}")]
    InvalidBlindedCount { expected: u64, got: u64 },

    #[error("promotion has no grants remaining")]
    NoGrantsLeft,

    #[error("no pre-registered claim for this wallet")]
    MissingPreRegisteredClaim,

    #[error("wallet is not reputable")]
    NotReputable,

    #[error("promotion {promotion_id} has corrupt credential value {value}")]
    CredentialValueDrift { promotion_id: String, value: String },

    #[error("wallet is not on the required platform: {0}")]
    UnsupportedPlatform(String),

    // ── Drain errors ─────────────────────────────────────────────────────────
    #[error("wallet has no deposit destination")]
    WalletNotLinked,

    #[error("unsupported deposit provider: {0}")]
    UnsupportedDepositProvider(String),

    #[error("no claim on the drained promotion for this wallet")]
    MismatchedWallet,

    #[error("suggestion count could not be computed")]
    InvalidSuggestionCount,

    #[error("drained amount exceeds the claim's credential allowance")]
    InvalidSuggestionAmount,

    #[error("wallet withdrawal limit exceeded")]
    WalletDrainLimitExceeded,

    #[error("wallet failed the drain reputation check")]
    WalletNotReputable,

    #[error("reputation service failure: {0}")]
    ReputationServiceFailure(String),

    #[error("credentials were already redeemed upstream")]
    DuplicateCredentialRedemption,

    #[error("drain transfer missing a deposit id")]
    InvalidDepositId,

    #[error("custodian returned no withdrawals")]
    NilCustodianResponse,

    #[error("transfer value over the per-submission limit; {submitted} of {requested} transfers submitted")]
    TransferLimitExceeded { submitted: usize, requested: usize },

    #[error("custodian withdrawal failed with status {status}")]
    CustodianWithdrawalFailed { status: String, retriable: bool },

    #[error("custodian request unauthorized")]
    CustodianUnauthorized,

    #[error("custodian error: {0}")]
    Custodian(String),

    // ── Mint errors ──────────────────────────────────────────────────────────
    #[error("mint limit exceeded: every listed promotion already carries a claim")]
    MintLimitExceeded,

    #[error("a claim already exists for this (wallet, promotion)")]
    ClaimAlreadyExists,

    // ── Resolver errors ──────────────────────────────────────────────────────
    #[error("no issuer known for public key {0}")]
    UnknownIssuer(String),

    // ── Collaborator errors ──────────────────────────────────────────────────
    #[error("credential issuer error: {0}")]
    Issuer(String),

    #[error("reputation oracle error: {0}")]
    Reputation(String),

    #[error("event topic is applying back-pressure")]
    EventBackpressure,

    #[error("event publish failed: {0}")]
    EventPublish(String),

    // ── Audit errors ─────────────────────────────────────────────────────────
    #[error("duplicate audit report")]
    DuplicateReport,

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl GrantError {
    /// The code persisted on a drain job row when this error fails it.
    /// `None` means the error is not a drain-row failure (it propagates).
    pub fn drain_code(&self) -> Option<&'static str> {
        match self {
            GrantError::MismatchedWallet => Some("mismatched_wallet"),
            GrantError::InvalidSuggestionCount => Some("invalid_suggestion_count"),
            GrantError::InvalidSuggestionAmount => Some("invalid_suggestion_amount"),
            GrantError::WalletDrainLimitExceeded => Some("wallet_drain_limit_exceeded"),
            GrantError::WalletNotReputable => Some("wallet_not_reputable"),
            GrantError::ReputationServiceFailure(_) => Some("reputation_service_failure"),
            GrantError::DuplicateCredentialRedemption => Some("cbr_dup_redeem"),
            GrantError::InvalidDepositId => Some("invalid_deposit_id"),
            GrantError::NilCustodianResponse => Some("nil_response"),
            GrantError::TransferLimitExceeded { .. } => Some("bf_transfer_limit"),
            GrantError::MintLimitExceeded => Some("mint_limit_exceeded"),
            _ => None,
        }
    }

    /// Whether a failed drain job carrying this error may be retried by the
    /// retry worker. Persisted alongside the errcode.
    pub fn drain_retriable(&self) -> bool {
        match self {
            GrantError::WalletDrainLimitExceeded
            | GrantError::WalletNotReputable
            | GrantError::ReputationServiceFailure(_)
            | GrantError::DuplicateCredentialRedemption
            | GrantError::TransferLimitExceeded { .. }
            | GrantError::CustodianUnauthorized
            | GrantError::Custodian(_) => true,
            GrantError::CustodianWithdrawalFailed { retriable, .. } => *retriable,
            _ => false,
        }
    }
}
