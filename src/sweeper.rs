//! Periodic retention sweep for conversation memory
//!
//! Runs on a fixed interval, never per-request. Each pass deletes only
//! conversation-kind records strictly older than the horizon, so overlap
//! with live reads and writes is safe.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::MemoryRepo;

/// Spawn the background sweep loop. The first pass runs immediately.
pub fn spawn(memory: MemoryRepo, horizon_days: u32, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match memory.sweep(horizon_days) {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::debug!(deleted, "retention sweep pass complete");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        }
    })
}
