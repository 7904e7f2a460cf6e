//! Periodic scheduler: re-submits `cleanup_stale_environments` on a fixed
//! interval, independent of whether the previous run has finished (the
//! handler itself is idempotent, per the state machine's design).

use std::time::Duration;

use crate::queue::JobQueue;

pub const CLEANUP_QUEUE: &str = "cleanup";
pub const ENVIRONMENT_QUEUE: &str = "environment";

pub const CLEANUP_STALE_ENVIRONMENTS_TASK: &str = "cleanup_stale_environments";

pub async fn run_scheduler(queue: JobQueue, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if let Err(e) = queue.submit(CLEANUP_QUEUE, CLEANUP_STALE_ENVIRONMENTS_TASK, &serde_json::json!({})).await {
            tracing::error!(error = %e, "failed to enqueue scheduled reconciliation sweep");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}
