use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability::{LOCKS_REAPED_TOTAL, WAL_COMPACTIONS_TOTAL};
use crate::time::now_ms;

const REAP_INTERVAL: Duration = Duration::from_secs(30);
const COMPACT_INTERVAL: Duration = Duration::from_secs(60);

/// One pass over all resources. Returns how many locks were released.
pub async fn reap_stale_locks(engine: &Engine, now: i64) -> usize {
    let mut released = 0;
    for key in engine.collect_stale_locks(now) {
        match engine.release_stale_lock(&key, now).await {
            Ok(true) => {
                released += 1;
                info!(key = %key, "released stale slot lock");
            }
            // Reclaimed by a booking or released since collection.
            Ok(false) => debug!(key = %key, "stale lock already gone"),
            Err(e) => debug!(key = %key, "reaper skip: {e}"),
        }
    }
    if released > 0 {
        metrics::counter!(LOCKS_REAPED_TOTAL).increment(released as u64);
    }
    released
}

/// Periodically releases orphaned slot locks that have gone stale.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        reap_stale_locks(&engine, now_ms()).await;
    }
}

/// Compact once `threshold` appends have accumulated. `Ok(true)` if it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, crate::engine::StoreError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    Ok(true)
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}
