use std::sync::Arc;

use ephemera_controller::LifecycleController;
use ephemera_store::EnvironmentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EnvironmentStore>,
    pub controller: Arc<LifecycleController>,
    /// `None` disables webhook signature verification, which also disables
    /// the webhook route entirely (no GitHub App configured).
    pub webhook_secret: Option<Arc<str>>,
    pub base_domain: Arc<str>,
}
