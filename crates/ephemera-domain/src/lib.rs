pub mod error;
pub mod types;

pub use error::DomainError;
pub use types::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, EnvironmentStatus,
    User, UserId,
};
