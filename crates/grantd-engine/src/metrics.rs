//! Prometheus metric families.
//!
//! Constructed once at startup and carried as a field of the service — no
//! process-global registry.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClaimLabels {
    pub platform: String,
    pub kind: String,
    pub legacy: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobLabels {
    pub job: String,
}

#[derive(Clone)]
pub struct Metrics {
    /// Grants claimed, by {platform, type, legacy}.
    pub grants_claimed: Family<ClaimLabels, Counter>,
    /// Total value claimed in BAT, by {platform, type, legacy}.
    pub value_claimed: Family<ClaimLabels, Counter<f64>>,
    /// Background job attempts that returned an error.
    pub job_errors: Family<JobLabels, Counter>,
    /// Live worker invocations per job.
    pub jobs_inflight: Family<JobLabels, Gauge>,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let grants_claimed = Family::<ClaimLabels, Counter>::default();
        registry.register(
            "grants_claimed",
            "Number of grants claimed",
            grants_claimed.clone(),
        );
        let value_claimed = Family::<ClaimLabels, Counter<f64>>::default();
        registry.register(
            "value_claimed_bat",
            "Total value claimed in BAT",
            value_claimed.clone(),
        );
        let job_errors = Family::<JobLabels, Counter>::default();
        registry.register(
            "job_errors",
            "Background job attempts that failed",
            job_errors.clone(),
        );
        let jobs_inflight = Family::<JobLabels, Gauge>::default();
        registry.register(
            "jobs_inflight",
            "Live worker invocations per job",
            jobs_inflight.clone(),
        );
        Self {
            grants_claimed,
            value_claimed,
            job_errors,
            jobs_inflight,
        }
    }

    /// A detached metrics value for tests; nothing scrapes it.
    pub fn unregistered() -> Self {
        let mut registry = Registry::default();
        Self::new(&mut registry)
    }
}
