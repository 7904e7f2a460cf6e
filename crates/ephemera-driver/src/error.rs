use thiserror::Error;

/// Errors from the Cluster Driver (C1) and Source-Host Driver (C2).
///
/// The `*NotConfigured` variants are the disabled-mode sentinel: callers
/// must treat them as fatal for the job rather than retry.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cluster driver not configured")]
    ClusterNotConfigured,

    #[error("source-host driver not configured for installation {0}")]
    SourceHostNotConfigured(i64),

    #[error("transient cluster API error: {0}")]
    Transient(String),

    #[error("manifest refused: unrecognized kind '{0}'")]
    UnrecognizedKind(String),

    #[error("manifest missing required field: {0}")]
    MalformedManifest(String),

    #[error("source-host API error: {0}")]
    SourceHostApi(String),

    #[error("file not found: {0}")]
    FileNotFound(String),
}
