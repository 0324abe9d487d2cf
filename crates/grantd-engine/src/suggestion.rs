//! Suggestion redemption and durable event emission.
//!
//! A suggestion call resolves and stores the event up front; the worker then
//! redeems the credentials and replays the stored payload onto the topic.
//! Emission is at-least-once — a replay after a crash re-redeems (tolerated
//! upstream as a duplicate) and re-publishes the identical record, so the
//! consumer can deduplicate on the event id.

use chrono::Utc;
use grantd_core::{CredentialBinding, GrantError, SuggestionJob};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{SuggestionEvent, SuggestionEventFunding};
use crate::service::Service;

/// How long to hold off emission after the topic pushes back.
const BACKPRESSURE_PAUSE: Duration = Duration::from_secs(30);

impl Service {
    /// Accept a user-directed contribution: resolve the credentials, build
    /// the event record, and enqueue a durable emission job.
    pub fn make_suggestion(
        &self,
        bindings: &[CredentialBinding],
        suggestion_text: String,
    ) -> Result<Uuid, GrantError> {
        let resolved = self.redeemed_credentials(bindings)?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let event = SuggestionEvent {
            id: id.to_string(),
            created_at: now,
            total_amount: resolved.total.to_string(),
            suggestion_text: suggestion_text.clone(),
            funding: resolved
                .sources
                .iter()
                .map(|s| SuggestionEventFunding {
                    kind: s.funding.kind.to_string(),
                    amount: s.funding.amount.to_string(),
                    cohort: s.funding.cohort.clone(),
                    promotion: s.funding.promotion_id.to_string(),
                })
                .collect(),
        };
        let event_payload =
            serde_json::to_vec(&event).map_err(|e| GrantError::Serialization(e.to_string()))?;

        self.store.insert_suggestion_job(&SuggestionJob {
            id,
            credentials: resolved.request_creds,
            suggestion_text,
            event_payload,
            erred: false,
            errcode: None,
            created_at: now,
        })?;
        self.scheduler.kick(crate::jobs::SUGGESTIONS);
        Ok(id)
    }

    /// One pass of the suggestion worker: redeem and emit one job.
    pub async fn run_next_suggestion_job(&self) -> Result<bool, GrantError> {
        if self.paused() {
            return Ok(false);
        }
        let Some((job, _lease)) = self.store.lease_next_suggestion_job()? else {
            return Ok(false);
        };

        match self
            .issuer_client
            .redeem_credentials(&job.credentials, &job.suggestion_text)
            .await
        {
            Ok(()) => {}
            // Already redeemed on an earlier attempt that died before
            // emission; carry on and emit.
            Err(GrantError::DuplicateCredentialRedemption) => {}
            Err(err) => return Err(err),
        }

        match self
            .events
            .publish(&self.topics.suggestion, &job.id.to_string(), &job.event_payload)
            .await
        {
            Ok(()) => {
                self.store.complete_suggestion_job(&job.id)?;
                info!(job = %job.id, "suggestion emitted");
                Ok(true)
            }
            Err(GrantError::EventBackpressure) => {
                warn!(job = %job.id, "event topic pushing back; pausing emission");
                self.pause_for(BACKPRESSURE_PAUSE);
                Err(GrantError::EventBackpressure)
            }
            Err(err) => Err(err),
        }
    }
}
