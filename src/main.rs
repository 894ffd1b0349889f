//! CLI entrypoint: load config, open the store, and run the hub.
//!
//! A `clap`-derived `Args` struct and a `tracing_subscriber` env-filter
//! initialized before anything else runs.

use clap::Parser;
use hubbub::clock::{SharedClock, SystemClock};
use hubbub::config::Config;
use hubbub::error::Error;
use hubbub::http::{build_router, AppState, OutboundClients};
use hubbub::lease::LeaseTable;
use hubbub::store::Store;
use hubbub::workers;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hubbub", about = "A PubSubHubbub-style hub server")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, default_value = "hubbub.toml")]
    config: PathBuf,

    /// Override the bind address from the config file.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Run a single worker tick (confirm, pull, push, or bootstrap) and
    /// exit, instead of starting the server. Useful for local debugging.
    #[arg(long)]
    run_once: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }

    let store = Arc::new(Store::open(&config.database_path).await?);
    let lease_table = LeaseTable::new();
    let clock: SharedClock = Arc::new(SystemClock);
    let state = AppState {
        store,
        lease_table,
        config: Arc::new(config),
        clock,
        outbound: OutboundClients::new(),
    };

    if let Some(worker) = args.run_once.as_deref() {
        run_single_tick(&state, worker).await?;
        return Ok(());
    }

    let bind_addr = state.config.bind_addr.clone();
    let bootstrap_period =
        Duration::from_secs(state.config.bootstrap.period_seconds.max(1) as u64).min(Duration::from_secs(300));

    spawn_worker_loop(state.clone(), Duration::from_secs(2), |s| {
        Box::pin(async move { workers::confirm::run_once(&s).await.map(|_| ()) })
    });
    spawn_worker_loop(state.clone(), Duration::from_secs(2), |s| {
        Box::pin(async move { workers::pull::run_once(&s).await.map(|_| ()) })
    });
    spawn_worker_loop(state.clone(), Duration::from_secs(1), |s| {
        Box::pin(async move { workers::push::run_once(&s).await.map(|_| ()) })
    });
    spawn_worker_loop(state.clone(), bootstrap_period, |s| {
        Box::pin(async move { workers::bootstrap::run_once(&s).await.map(|_| ()) })
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "hubbub listening");
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}

async fn run_single_tick(state: &AppState, worker: &str) -> Result<(), Error> {
    let did_work = match worker {
        "confirm" => workers::confirm::run_once(state).await?,
        "pull" => workers::pull::run_once(state).await?,
        "push" => workers::push::run_once(state).await?,
        "bootstrap" => workers::bootstrap::run_once(state).await?,
        other => {
            tracing::warn!(worker = other, "unknown worker name");
            false
        }
    };
    tracing::info!(worker, did_work, "single worker tick complete");
    Ok(())
}

fn spawn_worker_loop<F>(state: AppState, period: Duration, tick: F)
where
    F: Fn(AppState) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = tick(state.clone()).await {
                tracing::warn!(error = %err, "worker tick failed");
            }
        }
    });
}
