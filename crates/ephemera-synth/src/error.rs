use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("no docker-compose file found in repository")]
    ComposeNotFound,

    #[error("failed to parse compose document: {0}")]
    ComposeParse(String),

    #[error("LLM provider call failed: {0}")]
    Provider(String),

    #[error("failed to parse LLM response as manifests: {0}")]
    ResponseParse(String),

    #[error("manifest validation failed: {0}")]
    Validation(String),

    #[error("fetching repository context failed: {0}")]
    ContextFetch(String),
}
