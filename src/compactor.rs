use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

/// How often each property's WAL is checked for compaction.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the WAL once it has grown by `threshold` appends since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return Ok(false);
    }
    let result = engine.compact_wal().await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
    result?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task that keeps one property's WAL bounded.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
