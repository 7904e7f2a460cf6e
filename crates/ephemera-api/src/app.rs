use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use ephemera_controller::LifecycleController;
use ephemera_store::EnvironmentStore;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    store: Arc<dyn EnvironmentStore>,
    controller: Arc<LifecycleController>,
    webhook_secret: Option<Arc<str>>,
    base_domain: impl Into<Arc<str>>,
) -> Router {
    let state = AppState { store, controller, webhook_secret, base_domain: base_domain.into() };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .route("/webhooks/github", post(handlers::webhook))
        .route("/api/v1/environments", post(handlers::create_environment).get(handlers::list_environments))
        .route("/api/v1/environments/:id", get(handlers::get_environment))
        .route("/api/v1/environments/namespace/:namespace", get(handlers::get_environment_by_namespace))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
