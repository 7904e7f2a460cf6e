use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid repository full name: {0}")]
    InvalidRepository(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("invalid namespace '{0}': not a valid DNS label")]
    InvalidNamespace(String),
}
