//! grantd-sched
//!
//! Cadence-driven job scheduler. Each named job is an async function invoked
//! on every tick by a small pool of workers; `Ok(true)` means work was done
//! (the worker immediately tries again to drain the queue), `Ok(false)` means
//! nothing to do until the next tick, and `Err` is reported and absorbed —
//! a failing job never takes the scheduler down. A job can also be kicked to
//! run ahead of its next tick; the kick is a non-blocking signal with no
//! lifetime of its own.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobSpec {
    name: String,
    workers: usize,
    func: JobFn,
}

/// Clonable handle for kicking jobs from outside the scheduler.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    kicks: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl SchedulerHandle {
    /// Wake one worker of `name` ahead of its next tick. Unknown names are
    /// ignored: the kick is an optimization, never a correctness dependency.
    pub fn kick(&self, name: &str) {
        let kicks = self.kicks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(notify) = kicks.get(name) {
            notify.notify_one();
        }
    }

    fn notify_for(&self, name: &str) -> Arc<Notify> {
        let mut kicks = self.kicks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(kicks.entry(name.to_string()).or_default())
    }
}

pub struct Scheduler {
    cadence: Duration,
    jobs: Vec<JobSpec>,
    handle: SchedulerHandle,
}

impl Scheduler {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            jobs: Vec::new(),
            handle: SchedulerHandle::default(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Register a named job with `workers` concurrent invocations.
    pub fn register<F, Fut>(&mut self, name: &str, workers: usize, func: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let func: JobFn = Arc::new(move || Box::pin(func()) as JobFuture);
        self.jobs.push(JobSpec {
            name: name.to_string(),
            workers: workers.max(1),
            func,
        });
    }

    /// Run until `token` is cancelled. Cancellation stops new ticks
    /// immediately and waits for in-flight invocations to return.
    pub async fn run(self, token: CancellationToken) {
        let mut tasks = Vec::new();
        for job in self.jobs {
            let notify = self.handle.notify_for(&job.name);
            for worker in 0..job.workers {
                tasks.push(tokio::spawn(worker_loop(
                    job.name.clone(),
                    worker,
                    self.cadence,
                    Arc::clone(&job.func),
                    Arc::clone(&notify),
                    token.clone(),
                )));
            }
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn worker_loop(
    name: String,
    worker: usize,
    cadence: Duration,
    func: JobFn,
    notify: Arc<Notify>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(cadence) => {}
            _ = notify.notified() => {
                debug!(job = %name, worker, "kicked");
            }
        }
        // Drain: keep invoking while there is work, checking cancellation
        // between invocations.
        loop {
            if token.is_cancelled() {
                return;
            }
            match func().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(error) => {
                    warn!(job = %name, worker, %error, "job attempt failed");
                    break;
                }
            }
        }
    }
}
