use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("malformed webhook payload: {0}")]
    MalformedEvent(String),

    #[error("environment {0} not found")]
    EnvironmentNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] ephemera_store::StoreError),

    #[error("job queue error: {0}")]
    Jobs(#[from] ephemera_jobs::JobError),

    #[error("cluster driver error: {0}")]
    Cluster(#[from] ephemera_driver::DriverError),

    #[error("invalid task payload: {0}")]
    BadTaskPayload(#[from] serde_json::Error),
}
