pub mod controller;
pub mod error;
pub mod webhook;

pub use controller::{DestroyEnvironmentHandler, LifecycleController, ProvisionEnvironmentHandler, UpdateEnvironmentHandler};
pub use error::ControllerError;
pub use webhook::{parse_pull_request_event, PullRequestAction, PullRequestEvent};
