pub mod error;
pub mod handler;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use error::JobError;
pub use handler::{JobRegistry, TaskHandler};
pub use queue::{JobQueue, JobStatus, Task, RESULT_RETENTION};
pub use scheduler::{run_scheduler, CLEANUP_QUEUE, CLEANUP_STALE_ENVIRONMENTS_TASK, ENVIRONMENT_QUEUE};
pub use worker::{run_queue_janitor, Worker, HARD_TIME_LIMIT, SOFT_TIME_LIMIT};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _payload: serde_json::Value) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_task_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry.register("provision_environment", Arc::new(CountingHandler { calls: calls.clone() }));

        let handler = registry.get("provision_environment").unwrap();
        handler.handle(serde_json::json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registry_rejects_unknown_task() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.get("nope"), Err(JobError::UnknownTask(name)) if name == "nope"));
    }

    #[test]
    fn time_limits_match_the_documented_budget() {
        assert_eq!(SOFT_TIME_LIMIT.as_secs(), 25 * 60);
        assert_eq!(HARD_TIME_LIMIT.as_secs(), 30 * 60);
        assert!(SOFT_TIME_LIMIT < HARD_TIME_LIMIT);
    }
}
