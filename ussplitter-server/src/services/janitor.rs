//! Periodic removal of expired jobs

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::JobManager;

/// Sweep finished jobs older than `ttl` every `interval`.
///
/// A zero interval disables the sweep and returns `None`.
pub fn spawn_janitor(
    manager: Arc<JobManager>,
    ttl: Duration,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Job expiry sweep disabled");
        return None;
    }

    tracing::info!(
        ttl_secs = ttl.as_secs(),
        interval_secs = interval.as_secs(),
        "Job expiry sweep started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = manager.sweep_expired(ttl).await;
            if removed > 0 {
                tracing::debug!(removed, "Expiry sweep finished");
            }
        }
    }))
}
