//! Periodic purge of expired limiter state.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::security::SecurityPipeline;

/// Purge expired counters, idle sliding logs and lapsed blocks every
/// `interval` until `stop` fires.
pub fn spawn_maintenance(
    pipeline: SecurityPipeline,
    interval: Duration,
    mut stop: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = pipeline.purge_expired(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, "Purged expired limiter state");
                    }
                }
                _ = stop.recv() => break,
            }
        }
    })
}
