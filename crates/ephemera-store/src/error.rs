use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("domain error: {0}")]
    Domain(#[from] ephemera_domain::DomainError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
