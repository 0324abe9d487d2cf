//! grantd-clients
//!
//! HTTP clients for the external collaborators: the blinded-credential
//! issuer, the reputation oracle, and the three custodian backends. Each is
//! a thin reqwest wrapper implementing the engine's collaborator traits;
//! scripted substitutes live with the engine's tests.

pub mod bitflyer;
pub mod cb;
pub mod gemini;
pub mod reputation;
pub mod uphold;

pub use bitflyer::BitflyerClient;
pub use cb::CbClient;
pub use gemini::GeminiClient;
pub use reputation::ReputationClient;
pub use uphold::UpholdClient;
