pub mod audit;
pub mod claim;
pub mod constants;
pub mod decimal;
pub mod drain;
pub mod error;
pub mod promotion;
pub mod suggestion;
pub mod types;
pub mod wallet;

pub use audit::{BapReport, BatLossEvent, ClobberedClaim};
pub use claim::{Claim, ClaimCreds};
pub use constants::*;
pub use decimal::Money;
pub use drain::{DrainJob, DrainStatus, MintDrainJob};
pub use error::GrantError;
pub use promotion::{Issuer, Promotion};
pub use suggestion::{FundingSource, SuggestionJob};
pub use types::*;
pub use wallet::{DepositProvider, WalletRecord};
