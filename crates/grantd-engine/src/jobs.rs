//! Scheduler wiring.
//!
//! Registers every background worker under its job name, wrapping each
//! invocation with the in-flight gauge, the error counter, and the detached
//! work deadline so a wedged collaborator call cannot hold a worker forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use grantd_core::{GrantError, DETACHED_WORK_TIMEOUT_SECS};
use grantd_sched::Scheduler;

use crate::metrics::JobLabels;
use crate::service::Service;

pub const PROMOTION_MISSING_ISSUER: &str = "promotion-missing-issuer";
pub const SIGN_CLAIMS: &str = "sign-claims";
pub const SUGGESTIONS: &str = "suggestions";
pub const DRAINS: &str = "drains";
pub const BATCH_PAYMENTS: &str = "batch-payments";
pub const DRAIN_RETRIES: &str = "drain-retries";
pub const GEMINI_STATUS: &str = "gemini-status";
pub const MINT_DRAINS: &str = "mint-drains";

/// Register the full worker set on `scheduler`.
pub fn register_jobs(scheduler: &mut Scheduler, service: Arc<Service>) {
    register(scheduler, &service, PROMOTION_MISSING_ISSUER, 1, |s| async move {
        s.run_next_promotion_missing_issuer_job().await
    });
    register(scheduler, &service, SIGN_CLAIMS, 2, |s| async move {
        s.run_next_signing_job().await
    });
    register(scheduler, &service, SUGGESTIONS, 2, |s| async move {
        s.run_next_suggestion_job().await
    });
    register(scheduler, &service, DRAINS, 2, |s| async move {
        s.run_next_drain_job().await
    });
    register(scheduler, &service, BATCH_PAYMENTS, 1, |s| async move {
        s.run_next_batch_payments_job().await
    });
    register(scheduler, &service, DRAIN_RETRIES, 1, |s| async move {
        s.run_next_drain_retry_job().await
    });
    register(scheduler, &service, GEMINI_STATUS, 1, |s| async move {
        s.run_next_gemini_status_job().await
    });
    register(scheduler, &service, MINT_DRAINS, 1, |s| async move {
        s.run_next_mint_drain_job().await
    });
}

fn register<F, Fut>(
    scheduler: &mut Scheduler,
    service: &Arc<Service>,
    name: &'static str,
    workers: usize,
    run: F,
) where
    F: Fn(Arc<Service>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<bool, GrantError>> + Send + 'static,
{
    let service = Arc::clone(service);
    scheduler.register(name, workers, move || {
        let service = Arc::clone(&service);
        let run = run.clone();
        async move {
            let labels = JobLabels { job: name.into() };
            service.metrics.jobs_inflight.get_or_create(&labels).inc();
            let outcome = tokio::time::timeout(
                Duration::from_secs(DETACHED_WORK_TIMEOUT_SECS),
                run(Arc::clone(&service)),
            )
            .await;
            service.metrics.jobs_inflight.get_or_create(&labels).dec();
            match outcome {
                Ok(Ok(attempted)) => Ok(attempted),
                Ok(Err(err)) => {
                    service.metrics.job_errors.get_or_create(&labels).inc();
                    Err(anyhow::Error::new(err))
                }
                Err(_) => {
                    service.metrics.job_errors.get_or_create(&labels).inc();
                    Err(anyhow::anyhow!("job {name} exceeded its deadline"))
                }
            }
        }
    });
}
