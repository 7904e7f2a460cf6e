use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("no handler registered for task '{0}'")]
    UnknownTask(String),

    #[error("task '{task}' payload did not match the handler's expected shape: {source}")]
    BadPayload { task: String, #[source] source: serde_json::Error },

    #[error("task '{task}' exceeded its soft time limit")]
    SoftTimeout { task: String },

    #[error("task '{task}' exceeded its hard time limit and was killed")]
    HardTimeout { task: String },

    #[error("task handler failed: {0}")]
    Handler(String),

    #[error("queue storage error: {0}")]
    Storage(String),
}
