use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use scriptstats_core::channel::EventChannel;
use scriptstats_core::clock::{Clock, SystemClock};
use scriptstats_core::memory::{MemoryChannel, MemoryCounterStore};
use scriptstats_core::store::CounterStore;
use scriptstats_redis::{RedisConfig, RedisCounterStore, RedisStreamChannel};
use scriptstats_server::config::{Backend, Config};
use scriptstats_server::state::AppState;

/// `scriptstats health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$SCRIPTSTATS_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("SCRIPTSTATS_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

async fn connect_backends(
    cfg: &Config,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn CounterStore>, Arc<dyn EventChannel>)> {
    match cfg.backend {
        Backend::Memory => {
            warn!("SCRIPTSTATS_BACKEND=memory: counters and queued events are lost on restart");
            Ok((
                Arc::new(MemoryCounterStore::new(clock)),
                Arc::new(MemoryChannel::new()),
            ))
        }
        Backend::Redis => {
            let redis = RedisConfig::from_config(cfg);
            let store = RedisCounterStore::connect(&redis).await?;
            let channel = RedisStreamChannel::connect(&redis).await?;
            Ok((Arc::new(store), Arc::new(channel)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str());
    if command == Some("health") {
        run_health_check();
    }
    // Initialise structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scriptstats=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Ensure data directory exists before opening DuckDB.
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/scriptstats.db", cfg.data_dir);
    let db = scriptstats_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (store, channel) = connect_backends(&cfg, Arc::clone(&clock)).await?;
    let index = scriptstats_server::search::from_config(&cfg)?;
    let state = Arc::new(AppState::new(
        cfg.clone(),
        clock,
        store,
        channel,
        Arc::new(db),
        index,
    ));

    // `scriptstats resync` rewrites every statistics document and exits.
    if command == Some("resync") {
        let synced = state.reconciler.resync_all().await?;
        info!(synced, "resync complete");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = state.start_consumers(&shutdown_rx).await?;
    {
        let state = Arc::clone(&state);
        workers.push(tokio::spawn(
            scriptstats_server::scheduler::run_scheduler_loop(state, shutdown_rx.clone()),
        ));
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = scriptstats_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, backend = ?cfg.backend, "scriptstats listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown_tx.send(true).ok();
    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(5), worker).await.is_err() {
            warn!("consumer worker did not stop within 5s");
        }
    }

    state.flush_pending_syncs(Duration::from_secs(5)).await;

    Ok(())
}
