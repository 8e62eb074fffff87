//! Periodic purge of expired terminal jobs.
//!
//! Runs [`JobManager::cleanup`] on a fixed interval. A job is expired once
//! its last update (the moment it became terminal) is older than the
//! retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::JobManager;

/// Run the retention loop until `cancel` is triggered.
///
/// The first sweep happens immediately.
pub async fn run(
    manager: Arc<JobManager>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = interval.as_secs(),
        "Job retention task started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = ticker.tick() => {
                match manager.cleanup(retention).await {
                    Ok(0) => tracing::debug!("Job retention: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Job retention: purged expired jobs"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
