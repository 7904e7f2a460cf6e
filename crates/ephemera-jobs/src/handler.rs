use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::JobError;

/// A single task body. Handlers are registered by name in a [`JobRegistry`]
/// and must be idempotent: the lifecycle controller decides what to do from
/// recorded status and cluster reality, not from whether a previous attempt
/// of this same task ran to completion.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), JobError>;

    /// Raised by the worker when this task's run exceeds
    /// [`crate::worker::SOFT_TIME_LIMIT`], concurrently with the handler
    /// being aborted. Handlers that own a durable resource tied to the task
    /// (an `Environment`, say) must use this to mark it failed; the default
    /// no-op is correct for handlers with nothing external to reconcile
    /// (periodic sweeps).
    async fn on_soft_timeout(&self, _payload: serde_json::Value) -> Result<(), JobError> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_name.into(), handler);
    }

    pub fn get(&self, task_name: &str) -> Result<Arc<dyn TaskHandler>, JobError> {
        self.handlers.get(task_name).cloned().ok_or_else(|| JobError::UnknownTask(task_name.to_string()))
    }
}
