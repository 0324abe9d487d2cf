//! grantd-store
//!
//! The system of record. A sled-backed store exposing the transactional
//! operations the engine and workers are written against: atomic claim
//! creation with grant-pool accounting, compare-and-set credential signing,
//! all-or-nothing drain-batch inserts, guarded status transitions, and a
//! claim-one-row work-lease primitive safe under concurrent workers.

pub mod claims;
pub mod db;
pub mod drains;
pub mod lease;

pub use db::Store;
pub use lease::LeaseGuard;
