use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] ephemera_store::StoreError),

    #[error("cluster driver error: {0}")]
    Cluster(#[from] ephemera_driver::DriverError),

    #[error("job queue error: {0}")]
    Jobs(#[from] ephemera_jobs::JobError),
}
