//! grantd — the promotion grant service binary.
//!
//! Startup sequence:
//!   1. Load environment configuration
//!   2. Open (or initialise) the store
//!   3. Build the collaborator clients and the engine service
//!   4. Register the background workers with the scheduler
//!   5. Serve the REST surface until shutdown, then drain the workers

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use grantd_clients::{BitflyerClient, CbClient, GeminiClient, ReputationClient, UpholdClient};
use grantd_core::JOB_CADENCE_SECS;
use grantd_engine::service::Clients;
use grantd_engine::{jobs, MemoryTopic, Metrics, Service};
use grantd_http::{router, AppState};
use grantd_sched::Scheduler;
use grantd_store::Store;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "grantd", version, about = "Promotion grant lifecycle service")]
struct Args {
    /// Directory for the persistent store.
    #[arg(long, default_value = "~/.grantd/data")]
    data_dir: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:3333")]
    listen: SocketAddr,

    /// Worker tick interval in seconds.
    #[arg(long, default_value_t = JOB_CADENCE_SECS)]
    cadence: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grantd=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;
    info!(env = %config.environment, "grantd starting");

    // ── Store ─────────────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let store = Arc::new(Store::open(&data_dir).context("opening store")?);

    // ── Metrics ───────────────────────────────────────────────────────────────
    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Metrics::new(&mut registry);

    // ── Collaborators ─────────────────────────────────────────────────────────
    let clients = Clients {
        issuer: Arc::new(CbClient::new(&config.cb_server)),
        reputation: Arc::new(ReputationClient::new(
            &config.reputation_server,
            &config.reputation_token,
        )),
        uphold: Arc::new(UpholdClient::new(
            &config.uphold_server,
            &config.grant_wallet_card_id,
            &config.grant_wallet_private_key,
        )),
        bitflyer: Arc::new(BitflyerClient::new(
            &config.bitflyer_server,
            &config.bitflyer_client_id,
            &config.bitflyer_client_secret,
            &config.bitflyer_source_from,
        )),
        gemini: Arc::new(GeminiClient::new(
            &config.gemini_server,
            &config.gemini_client_id,
            &config.gemini_api_key,
        )),
        // The deployment's ordered topic system sits behind this seam; the
        // bounded in-memory topic serves local and single-node use.
        events: Arc::new(MemoryTopic::new(4096)),
    };

    // ── Scheduler + engine ────────────────────────────────────────────────────
    let mut scheduler = Scheduler::new(Duration::from_secs(args.cadence));
    let service = Arc::new(Service::new(
        store,
        clients,
        config.service_config(),
        metrics,
        scheduler.handle(),
    ));
    jobs::register_jobs(&mut scheduler, Arc::clone(&service));

    let token = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(token.clone()));

    // ── HTTP ──────────────────────────────────────────────────────────────────
    let app = router(AppState {
        service,
        registry: Arc::new(registry),
    });
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "grantd listening");

    let shutdown_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_token.cancel();
        })
        .await
        .context("serving HTTP")?;

    // Give in-flight workers their chance to return before exit.
    token.cancel();
    scheduler_task.await.context("stopping scheduler")?;
    info!("grantd stopped");
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
