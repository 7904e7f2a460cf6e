//! HTTP surface: GitHub webhooks, the direct-create REST path, environment
//! read endpoints, and health checks.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use ephemera_domain::{Environment, EnvironmentId};
use ephemera_store::ListEnvironmentsFilter;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.store.list_active_environments().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `sha256=<hex hmac>` against the raw body, constant-time compare.
fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else { return false };
    let Ok(expected) = hex::decode(hex_sig) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>, ApiError> {
    let Some(secret) = &state.webhook_secret else {
        return Err(ApiError::forbidden("webhook surface is not configured"));
    };

    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("missing X-Hub-Signature-256"))?;
    if !verify_signature(secret, signature, &body) {
        return Err(ApiError::forbidden("signature mismatch"));
    }

    let event = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let delivery_id = headers.get("X-GitHub-Delivery").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();

    if event == "ping" {
        return Ok(Json(json!({ "status": "pong" })));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
    let parsed = ephemera_controller::parse_pull_request_event(&event, &payload)?;

    let Some(pr_event) = parsed else {
        return Ok(Json(json!({ "status": "ignored", "event": event, "delivery_id": delivery_id })));
    };

    let action = format!("{:?}", pr_event.action);
    let pr_number = pr_event.pr_number;
    state.controller.dispatch_pull_request_event(&pr_event).await?;

    Ok(Json(json!({
        "status": "accepted",
        "event": event,
        "action": action,
        "pr": pr_number,
        "delivery_id": delivery_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateEnvironmentRequest {
    pub repository_full_name: String,
    pub repository_name: String,
    pub pr_number: i64,
    pub pr_title: String,
    pub branch_name: String,
    pub commit_sha: String,
    pub installation_id: Option<i64>,
    pub user_id: Option<i64>,
    pub user_login: Option<String>,
    pub user_avatar_url: Option<String>,
}

/// `POST /api/v1/environments` — the GitHub Actions direct-create path.
/// Idempotent on (repository_full_name, pr_number).
pub async fn create_environment(State(state): State<AppState>, Json(req): Json<CreateEnvironmentRequest>) -> Result<Json<Environment>, ApiError> {
    if let Some(existing) = state.store.get_environment_by_pr(&req.repository_full_name, req.pr_number).await? {
        return Ok(Json(existing));
    }

    let owner_id = match (req.user_id, &req.user_login) {
        (Some(github_id), Some(login)) => Some(state.store.find_or_create_user(github_id, login, None, req.user_avatar_url.as_deref()).await?.id),
        _ => None,
    };

    let environment = state
        .store
        .create_environment(
            &req.repository_full_name,
            &req.repository_name,
            req.pr_number,
            &req.pr_title,
            &req.branch_name,
            &req.commit_sha,
            req.installation_id,
            owner_id,
            &state.base_domain,
        )
        .await?;
    state.store.create_deployment(environment.id, &req.commit_sha, None).await?;
    Ok(Json(environment))
}

#[derive(Debug, Deserialize)]
pub struct ListEnvironmentsQuery {
    pub repository: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_environments(State(state): State<AppState>, Query(query): Query<ListEnvironmentsQuery>) -> Result<Json<Vec<Environment>>, ApiError> {
    let filter = ListEnvironmentsFilter { repository_full_name: query.repository, active_only: query.active_only };
    let environments = state.store.list_environments(&filter).await?;
    Ok(Json(environments))
}

pub async fn get_environment(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Environment>, ApiError> {
    state
        .store
        .get_environment_by_id(EnvironmentId(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("environment {id} not found")))
}

pub async fn get_environment_by_namespace(State(state): State<AppState>, Path(namespace): Path<String>) -> Result<Json<Environment>, ApiError> {
    state
        .store
        .get_environment_by_namespace(&namespace)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no environment with namespace {namespace}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_matches_known_vector() {
        // GitHub's own documented example: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries
        let secret = "It's a Secret";
        let body = b"Hello, World!";
        let signature = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_signature(secret, signature, body));
    }

    #[test]
    fn signature_verification_rejects_tampering() {
        let secret = "It's a Secret";
        let body = b"Hello, World!";
        let signature = "sha256=0000000000000000000000000000000000000000000000000000000000000000";
        assert!(!verify_signature(secret, signature, body));
    }

    #[test]
    fn signature_verification_rejects_malformed_header() {
        assert!(!verify_signature("secret", "not-a-signature", b"body"));
    }
}
