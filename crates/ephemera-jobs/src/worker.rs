//! Worker pool: each worker pulls one task at a time (prefetch = 1), opens a
//! per-task database scope inside the handler, and acknowledges on return
//! (late-ack). `SELECT ... FOR UPDATE SKIP LOCKED` in [`crate::queue::JobQueue::claim`]
//! is what gives concurrent workers that prefetch=1 guarantee without a
//! broker.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::error::JobError;
use crate::handler::JobRegistry;
use crate::queue::JobQueue;

/// Soft limit: the handler is aborted and [`crate::handler::TaskHandler::on_soft_timeout`]
/// is raised so it can mark whatever durable resource it owns as failed before
/// the hard limit would otherwise kill the worker uncleanly.
pub const SOFT_TIME_LIMIT: Duration = Duration::from_secs(25 * 60);
/// Hard limit: the task is forcibly aborted unconditionally, soft timeout or not.
pub const HARD_TIME_LIMIT: Duration = Duration::from_secs(30 * 60);

pub struct Worker {
    id: String,
    queue: JobQueue,
    registry: JobRegistry,
    queues: Vec<String>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: JobQueue, registry: JobRegistry, queues: Vec<String>, poll_interval: Duration) -> Self {
        Worker { id: id.into(), queue, registry, queues, poll_interval }
    }

    /// Runs until `shutdown` resolves. Polls each configured queue in turn;
    /// sleeps `poll_interval` when every queue is empty.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut claimed_any = false;
            for queue_name in &self.queues {
                match self.queue.claim(queue_name, &self.id).await {
                    Ok(Some(task)) => {
                        claimed_any = true;
                        self.run_task(task.id, &task.task_name, task.payload).await;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, queue = %queue_name, "failed to claim task"),
                }
            }

            if !claimed_any {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    async fn run_task(&self, id: Uuid, task_name: &str, payload: serde_json::Value) {
        let handler = match self.registry.get(task_name) {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(task = task_name, error = %e, "no handler for task, marking failed");
                let _ = self.queue.fail(id, &e.to_string()).await;
                return;
            }
        };

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let task_name_owned = task_name.to_string();
        let handler_for_run = handler.clone();
        let soft_timeout_payload = payload.clone();
        let handle = tokio::spawn(async move {
            let result = handler_for_run.handle(payload).await;
            let _ = done_tx.send(());
            result
        });

        let abort_handle = handle.abort_handle();
        let soft_timeout_abort = abort_handle.clone();
        let soft_timeout_handler = handler.clone();
        let task_name_for_watch = task_name_owned.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = done_rx => {}
                _ = tokio::time::sleep(SOFT_TIME_LIMIT) => {
                    tracing::error!(task = %task_name_for_watch, "task exceeded its soft time limit, aborting and raising into the handler");
                    soft_timeout_abort.abort();
                    if let Err(e) = soft_timeout_handler.on_soft_timeout(soft_timeout_payload).await {
                        tracing::error!(task = %task_name_for_watch, error = %e, "handler failed to react to its own soft timeout");
                    }
                }
            }
        });

        match tokio::time::timeout(HARD_TIME_LIMIT, handle).await {
            Ok(Ok(Ok(()))) => {
                if let Err(e) = self.queue.complete(id).await {
                    tracing::error!(task = %task_name_owned, error = %e, "failed to record task completion");
                }
            }
            Ok(Ok(Err(job_err))) => {
                tracing::warn!(task = %task_name_owned, error = %job_err, "task handler returned an error");
                let _ = self.queue.fail(id, &job_err.to_string()).await;
            }
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                // Cancellation only ever comes from the soft-timeout branch above,
                // which has already driven the handler's on_soft_timeout reaction.
                let soft_timeout = JobError::SoftTimeout { task: task_name_owned.clone() };
                let _ = self.queue.fail(id, &soft_timeout.to_string()).await;
            }
            Ok(Err(join_err)) => {
                tracing::error!(task = %task_name_owned, error = %join_err, "task panicked");
                let _ = self.queue.fail(id, &format!("panicked: {join_err}")).await;
            }
            Err(_elapsed) => {
                // `timeout` dropping the JoinHandle future only detaches it; the
                // task keeps running unless aborted explicitly.
                abort_handle.abort();
                let hard_timeout = JobError::HardTimeout { task: task_name_owned.clone() };
                tracing::error!(task = %task_name_owned, "task exceeded its hard time limit, killing");
                let _ = self.queue.fail(id, &hard_timeout.to_string()).await;
            }
        }
    }
}

/// Background loop that requeues tasks left `running` by a worker that died
/// mid-task, and purges result rows past their retention window.
pub async fn run_queue_janitor(queue: JobQueue, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match queue.requeue_stale(ChronoDuration::from_std(HARD_TIME_LIMIT).unwrap_or(ChronoDuration::minutes(30))).await {
            Ok(n) if n > 0 => tracing::info!(count = n, "requeued stale tasks left running by a dead worker"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "failed to requeue stale tasks"),
        }
        match queue.purge_old_results().await {
            Ok(n) if n > 0 => tracing::debug!(count = n, "purged expired task results"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "failed to purge expired task results"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}
