pub mod cluster;
pub mod error;
pub mod github;

pub use cluster::{ClusterDriver, DisabledClusterDriver, KubeClusterDriver, RECOGNIZED_KINDS};
pub use error::DriverError;
pub use github::{build_environment_url, CommitState, DisabledSourceHostDriver, GitHubDriver, SourceHostDriver};
