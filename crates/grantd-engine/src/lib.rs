//! grantd-engine
//!
//! The promotion grant lifecycle engine: claim creation with eligibility and
//! quota accounting, asynchronous credential signing, drain initiation and
//! custodian dispatch, batched payouts with their value ceiling, and the
//! suggestion redemption pipeline. The engine owns no transport and no
//! process: the HTTP layer calls into [`Service`] and the scheduler drives
//! the `run_next_*` workers.

pub mod batch;
pub mod claim;
pub mod collab;
pub mod custodian;
pub mod drain;
pub mod events;
pub mod jobs;
pub mod metrics;
pub mod mint;
pub mod resolver;
pub mod service;
pub mod signing;
pub mod suggestion;

pub use collab::{CredentialIssuer, DrainReputability, ReputationOracle, SignedCreds};
pub use custodian::{BitflyerApi, GeminiApi, GeminiTxStatus, UpholdApi};
pub use events::{EventTopic, MemoryTopic, Topics};
pub use metrics::Metrics;
pub use service::{Service, ServiceConfig};

#[cfg(any(test, feature = "testutil"))]
pub mod testsupport;
