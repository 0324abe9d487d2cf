//! Event bus contract and record schemas.
//!
//! The bus itself is an external collaborator: an append-only ordered topic
//! system with at-least-once delivery. Topic names are configuration,
//! templated with the deployment environment prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantd_core::GrantError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Topic names for one deployment environment.
#[derive(Clone, Debug)]
pub struct Topics {
    pub suggestion: String,
    pub attestation: String,
}

impl Topics {
    pub fn new(env: &str) -> Self {
        Self {
            suggestion: format!("{env}.grant.suggestion"),
            attestation: format!("{env}.wallet.attestation"),
        }
    }
}

/// Append-only ordered publish of schema'd records.
#[async_trait]
pub trait EventTopic: Send + Sync {
    /// Publish one record. [`GrantError::EventBackpressure`] asks the caller
    /// to pause and retry later; the record was not accepted.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), GrantError>;
}

// ── Record schemas ───────────────────────────────────────────────────────────

/// One funding line of a suggestion event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestionEventFunding {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: String,
    pub cohort: String,
    pub promotion: String,
}

/// A user-directed contribution redeemed from credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionEvent {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub total_amount: String,
    /// Base64 of the user-facing suggestion document.
    pub suggestion_text: String,
    pub funding: Vec<SuggestionEventFunding>,
}

/// An operator attestation about a wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAttestationEvent {
    pub wallet_id: String,
    pub service: String,
    pub signal: String,
    pub score: i32,
    pub justification: String,
    pub created_at: DateTime<Utc>,
}

// ── In-memory topic ──────────────────────────────────────────────────────────

/// Bounded in-memory topic for the local environment and tests. Applies
/// back-pressure when full; draining is the consumer's business.
pub struct MemoryTopic {
    capacity: usize,
    records: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl MemoryTopic {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<(String, String, Vec<u8>)> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn drain(&self) -> Vec<(String, String, Vec<u8>)> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl EventTopic for MemoryTopic {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), GrantError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.capacity {
            return Err(GrantError::EventBackpressure);
        }
        records.push((topic.to_string(), key.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_topic_applies_backpressure_when_full() {
        let topic = MemoryTopic::new(2);
        topic.publish("t", "a", b"1").await.unwrap();
        topic.publish("t", "b", b"2").await.unwrap();
        let err = topic.publish("t", "c", b"3").await.unwrap_err();
        assert!(matches!(err, GrantError::EventBackpressure));
        assert_eq!(topic.records().len(), 2);
    }

    #[test]
    fn topic_names_carry_the_environment_prefix() {
        let topics = Topics::new("staging");
        assert_eq!(topics.suggestion, "staging.grant.suggestion");
        assert_eq!(topics.attestation, "staging.wallet.attestation");
    }
}
