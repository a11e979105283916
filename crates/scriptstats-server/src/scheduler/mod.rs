use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::state::AppState;

/// Flush every script with unsynced index events. Returns how many synced.
pub async fn process_once(state: &Arc<AppState>) -> anyhow::Result<usize> {
    state.reconciler.flush_pending().await
}

/// Periodic pending-sync flush so the index lag bound holds even when a
/// script stops receiving events.
pub async fn run_scheduler_loop(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let tick = state.config.index_sync_interval();
    info!(tick_seconds = tick.as_secs(), "index sync scheduler started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        match process_once(&state).await {
            Ok(0) => {}
            Ok(synced) => info!(synced, "pending index syncs flushed"),
            Err(err) => error!(error = %err, "index sync scheduler iteration failed"),
        }
    }
    info!("index sync scheduler stopped");
}
