//! C8 — the lifecycle state machine. Two halves: the synchronous handlers the
//! webhook route calls inline (cheap store writes + a job enqueue, so the
//! HTTP response stays fast) and the task bodies the job runtime drives
//! (slow I/O against the cluster, the source host, and optionally an LLM).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ephemera_domain::{Deployment, Environment, EnvironmentId, EnvironmentStatus};
use ephemera_driver::{ClusterDriver, CommitState, SourceHostDriver};
use ephemera_jobs::{JobError, JobQueue, TaskHandler, ENVIRONMENT_QUEUE};
use ephemera_store::EnvironmentStore;
use ephemera_synth::compose::{parse_compose, synthesize_baseline};
use ephemera_synth::synthesizer::generate_plan_summary;
use ephemera_synth::{LlmSynthesizer, RepoFileFetcher, SynthError};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ControllerError;
use crate::webhook::{PullRequestAction, PullRequestEvent};

const COMPOSE_CANDIDATES: &[&str] = &["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"];
const QUOTA_CPU: &str = "1";
const QUOTA_MEMORY: &str = "2Gi";
const QUOTA_PODS: &str = "10";
const COMMIT_CONTEXT: &str = "ephemera/environment";

pub struct LifecycleController {
    store: Arc<dyn EnvironmentStore>,
    jobs: JobQueue,
    cluster: Arc<dyn ClusterDriver>,
    source_host: Arc<dyn SourceHostDriver>,
    synthesizer: Option<Arc<LlmSynthesizer>>,
    base_domain: String,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        jobs: JobQueue,
        cluster: Arc<dyn ClusterDriver>,
        source_host: Arc<dyn SourceHostDriver>,
        synthesizer: Option<Arc<LlmSynthesizer>>,
        base_domain: impl Into<String>,
    ) -> Self {
        LifecycleController { store, jobs, cluster, source_host, synthesizer, base_domain: base_domain.into() }
    }

    // ── Webhook-driven handlers (C7 dispatch target) ────────────────────────

    pub async fn dispatch_pull_request_event(&self, event: &PullRequestEvent) -> Result<(), ControllerError> {
        match event.action {
            PullRequestAction::OpenedOrReopened => self.on_opened_or_reopened(event).await,
            PullRequestAction::Synchronize => self.on_synchronize(event).await,
            PullRequestAction::Closed => self.on_closed(event).await,
        }
    }

    async fn on_opened_or_reopened(&self, event: &PullRequestEvent) -> Result<(), ControllerError> {
        if self.store.get_environment_by_pr(&event.repository_full_name, event.pr_number).await?.is_some() {
            return Ok(());
        }

        let owner_id = match &event.author {
            Some(author) => Some(self.store.find_or_create_user(author.github_id, &author.login, None, author.avatar_url.as_deref()).await?.id),
            None => None,
        };

        let environment = self
            .store
            .create_environment(
                &event.repository_full_name,
                &event.repository_name,
                event.pr_number,
                &event.pr_title,
                &event.branch_name,
                &event.commit_sha,
                event.installation_id,
                owner_id,
                &self.base_domain,
            )
            .await?;
        self.store.create_deployment(environment.id, &event.commit_sha, None).await?;
        self.jobs.submit(ENVIRONMENT_QUEUE, "provision_environment", &ProvisionPayload { environment_id: environment.id.0 }).await?;
        Ok(())
    }

    async fn on_synchronize(&self, event: &PullRequestEvent) -> Result<(), ControllerError> {
        let environment = self
            .store
            .get_environment_by_pr(&event.repository_full_name, event.pr_number)
            .await?
            .ok_or_else(|| ControllerError::EnvironmentNotFound(format!("{}#{}", event.repository_full_name, event.pr_number)))?;

        self.store.update_environment_commit(environment.id, &event.commit_sha).await?;
        self.store.create_deployment(environment.id, &event.commit_sha, None).await?;
        self.jobs.submit(ENVIRONMENT_QUEUE, "update_environment", &UpdatePayload { environment_id: environment.id.0 }).await?;
        Ok(())
    }

    async fn on_closed(&self, event: &PullRequestEvent) -> Result<(), ControllerError> {
        let environment = self
            .store
            .get_environment_by_pr(&event.repository_full_name, event.pr_number)
            .await?
            .ok_or_else(|| ControllerError::EnvironmentNotFound(format!("{}#{}", event.repository_full_name, event.pr_number)))?;

        self.store.update_environment_status(environment.id, EnvironmentStatus::Destroying, None).await?;
        self.jobs
            .submit(ENVIRONMENT_QUEUE, "destroy_environment", &DestroyPayload { environment_id: environment.id.0, merged: event.merged })
            .await?;
        Ok(())
    }

    // ── Task bodies (run by ephemera-jobs workers) ──────────────────────────

    pub async fn provision_environment(&self, environment_id: EnvironmentId) -> Result<(), ControllerError> {
        let environment = self.store.get_environment_by_id(environment_id).await?.ok_or(ControllerError::EnvironmentNotFound(environment_id.to_string()))?;
        if !matches!(environment.status, EnvironmentStatus::Pending | EnvironmentStatus::Provisioning) {
            return Ok(()); // already handled by a prior attempt, or a reconciler retry re-entering PROVISIONING
        }
        let deployment = self.store.get_latest_deployment(environment_id).await?;

        if environment.status == EnvironmentStatus::Pending {
            self.store.update_environment_status(environment_id, EnvironmentStatus::Provisioning, None).await?;
        }

        let mut labels = BTreeMap::new();
        labels.insert("pr-number".to_string(), environment.pr_number.to_string());
        labels.insert("repository".to_string(), environment.repository_name.clone());
        labels.insert("environment-id".to_string(), environment_id.to_string());

        if let Err(e) = self.cluster.create_namespace(&environment.namespace, &labels).await {
            return self.fail_provisioning(&environment, deployment.as_ref(), &format!("failed to create namespace: {e}")).await;
        }
        if let Err(e) = self.cluster.create_resource_quota(&environment.namespace, QUOTA_CPU, QUOTA_MEMORY, QUOTA_PODS).await {
            return self.fail_provisioning(&environment, deployment.as_ref(), &format!("failed to create resource quota: {e}")).await;
        }

        let (applied, service_urls, ai_generated, ai_plan, fallback_reason) = self.synthesize_and_apply(&environment).await;

        if let Some(deployment) = &deployment {
            self.store
                .update_deployment_status(
                    deployment.id,
                    ephemera_domain::DeploymentStatus::Success,
                    None,
                    Some(&format!("applied {applied} manifest(s)")),
                    Some(ai_generated),
                    ai_plan.as_deref(),
                    fallback_reason.as_deref(),
                )
                .await?;
        }

        self.store.update_environment_status(environment_id, EnvironmentStatus::Ready, None).await?;

        if let Some(installation_id) = environment.installation_id {
            let mut body = format!("Preview environment is ready for `{}`.", environment.commit_sha);
            if !service_urls.is_empty() {
                body.push_str("\n\nServices:\n");
                for url in &service_urls {
                    body.push_str(&format!("- {url}\n"));
                }
            }
            if let Some(reason) = &fallback_reason {
                body.push_str(&format!("\n_Note: fell back to the baseline synthesizer ({reason})._"));
            }
            let _ = self.source_host.post_comment(installation_id, &environment.repository_full_name, environment.pr_number, &body).await;
            let _ = self
                .source_host
                .set_commit_status(
                    installation_id,
                    &environment.repository_full_name,
                    &environment.commit_sha,
                    CommitState::Success,
                    "Preview environment ready",
                    COMMIT_CONTEXT,
                    Some(&environment.environment_url),
                )
                .await;
        }

        Ok(())
    }

    /// Raised by a task handler's `on_soft_timeout` when the worker aborts it
    /// at the 25-minute soft limit. Marks the environment and its in-flight
    /// deployment FAILED so the soft timeout is reflected immediately instead
    /// of waiting on the next hourly reconciler sweep. Store calls each open
    /// and release their own scope, so no session survives this call.
    async fn mark_timed_out(&self, environment_id: EnvironmentId, task_name: &str) -> Result<(), ControllerError> {
        let Some(environment) = self.store.get_environment_by_id(environment_id).await? else { return Ok(()) };
        let reason = format!("task '{task_name}' exceeded its soft time limit");

        if environment.status == EnvironmentStatus::Failed || environment.status.can_transition_to(EnvironmentStatus::Failed) {
            self.store.update_environment_status(environment_id, EnvironmentStatus::Failed, Some(&reason)).await?;
        }
        if let Some(deployment) = self.store.get_latest_deployment(environment_id).await? {
            if !deployment.status.is_terminal() {
                self.store
                    .update_deployment_status(deployment.id, ephemera_domain::DeploymentStatus::Failed, Some(&reason), None, None, None, None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fail_provisioning(&self, environment: &Environment, deployment: Option<&Deployment>, reason: &str) -> Result<(), ControllerError> {
        self.store.update_environment_status(environment.id, EnvironmentStatus::Failed, Some(reason)).await?;
        if let Some(deployment) = deployment {
            self.store
                .update_deployment_status(deployment.id, ephemera_domain::DeploymentStatus::Failed, Some(reason), None, None, None, None)
                .await?;
        }
        if let Some(installation_id) = environment.installation_id {
            let _ = self.source_host.post_comment(installation_id, &environment.repository_full_name, environment.pr_number, &format!("Failed to provision preview environment: {reason}")).await;
            let _ = self
                .source_host
                .set_commit_status(installation_id, &environment.repository_full_name, &environment.commit_sha, CommitState::Failure, reason, COMMIT_CONTEXT, None)
                .await;
        }
        Ok(())
    }

    /// Tries the LLM pipeline first (when configured), falls back to the
    /// deterministic baseline on any failure, and always applies whatever
    /// manifest set results. Returns (applied_count, service_urls,
    /// ai_generated, ai_plan, fallback_reason).
    async fn synthesize_and_apply(&self, environment: &Environment) -> (usize, Vec<String>, bool, Option<String>, Option<String>) {
        let mut ai_generated = false;
        let mut analyzed_files = Vec::new();
        let mut fallback_reason = None;
        let mut provider_name = None;

        let manifests = match (&self.synthesizer, environment.installation_id) {
            (Some(synthesizer), Some(installation_id)) => {
                let fetcher = InstallationFileFetcher { driver: self.source_host.clone(), installation_id };
                match synthesizer
                    .generate(&fetcher, &environment.repository_full_name, &environment.commit_sha, &environment.namespace, &environment.repository_name, &self.base_domain)
                    .await
                {
                    Ok((manifests, files)) => {
                        ai_generated = true;
                        analyzed_files = files;
                        provider_name = Some(synthesizer.provider_name().to_string());
                        manifests
                    }
                    Err(e) => {
                        fallback_reason = Some(format!("LLM synthesis failed: {e}"));
                        self.baseline_manifests(environment).await
                    }
                }
            }
            (_, None) => {
                fallback_reason = Some("no GitHub App installation configured for this repository".to_string());
                Vec::new()
            }
            (None, _) => self.baseline_manifests(environment).await,
        };

        let mut applied = 0usize;
        let mut service_urls = Vec::new();
        for manifest in &manifests {
            match self.cluster.apply_manifest(manifest).await {
                Ok(()) => {
                    applied += 1;
                    if manifest["kind"] == "Ingress" {
                        if let Some(rules) = manifest["spec"]["rules"].as_array() {
                            for rule in rules {
                                if let Some(host) = rule["host"].as_str() {
                                    service_urls.push(format!("https://{host}"));
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(namespace = %environment.namespace, error = %e, "failed to apply a synthesized manifest");
                    fallback_reason.get_or_insert_with(|| format!("one or more manifests failed to apply: {e}"));
                }
            }
        }

        let ai_plan = if ai_generated {
            Some(generate_plan_summary(provider_name.as_deref().unwrap_or("unknown"), &analyzed_files, &manifests, &service_urls, &[]))
        } else {
            None
        };

        (applied, service_urls, ai_generated, ai_plan, fallback_reason)
    }

    async fn baseline_manifests(&self, environment: &Environment) -> Vec<Value> {
        let Some(installation_id) = environment.installation_id else { return Vec::new() };

        for candidate in COMPOSE_CANDIDATES {
            match self.source_host.fetch_file(installation_id, &environment.repository_full_name, candidate, &environment.commit_sha).await {
                Ok(Some(bytes)) => {
                    let content = String::from_utf8_lossy(&bytes).to_string();
                    return match parse_compose(&content) {
                        Ok(compose) => synthesize_baseline(&compose, &environment.namespace, &environment.repository_name, &self.base_domain),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to parse compose file for baseline synthesis");
                            Vec::new()
                        }
                    };
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, candidate, "failed to fetch candidate compose file");
                    continue;
                }
            }
        }
        Vec::new()
    }

    pub async fn update_environment(&self, environment_id: EnvironmentId) -> Result<(), ControllerError> {
        let environment = self.store.get_environment_by_id(environment_id).await?.ok_or(ControllerError::EnvironmentNotFound(environment_id.to_string()))?;
        if environment.status != EnvironmentStatus::Updating {
            return Ok(());
        }

        let exists = self.cluster.namespace_exists(&environment.namespace).await?;
        if exists {
            self.store.update_environment_status(environment_id, EnvironmentStatus::Ready, None).await?;
            if let Some(installation_id) = environment.installation_id {
                let _ = self
                    .source_host
                    .set_commit_status(installation_id, &environment.repository_full_name, &environment.commit_sha, CommitState::Success, "Preview environment updated", COMMIT_CONTEXT, Some(&environment.environment_url))
                    .await;
            }
        } else {
            let reason = "namespace no longer exists";
            self.store.update_environment_status(environment_id, EnvironmentStatus::Failed, Some(reason)).await?;
            if let Some(installation_id) = environment.installation_id {
                let _ = self
                    .source_host
                    .set_commit_status(installation_id, &environment.repository_full_name, &environment.commit_sha, CommitState::Failure, reason, COMMIT_CONTEXT, None)
                    .await;
            }
        }
        Ok(())
    }

    pub async fn destroy_environment(&self, environment_id: EnvironmentId, merged: bool) -> Result<(), ControllerError> {
        let environment = self.store.get_environment_by_id(environment_id).await?.ok_or(ControllerError::EnvironmentNotFound(environment_id.to_string()))?;
        if environment.status != EnvironmentStatus::Destroying {
            return Ok(());
        }

        match self.cluster.delete_namespace(&environment.namespace).await {
            Ok(()) => {
                self.store.update_environment_status(environment_id, EnvironmentStatus::Destroyed, None).await?;
                if let Some(installation_id) = environment.installation_id {
                    let verb = if merged { "merged" } else { "closed" };
                    let body = format!("Pull request {verb}; preview environment has been torn down.");
                    let _ = self.source_host.post_comment(installation_id, &environment.repository_full_name, environment.pr_number, &body).await;
                }
                Ok(())
            }
            Err(e) => {
                let reason = format!("failed to delete namespace: {e}");
                self.store.update_environment_status(environment_id, EnvironmentStatus::Failed, Some(&reason)).await?;
                Ok(())
            }
        }
    }
}

struct InstallationFileFetcher {
    driver: Arc<dyn SourceHostDriver>,
    installation_id: i64,
}

#[async_trait]
impl RepoFileFetcher for InstallationFileFetcher {
    async fn fetch_file(&self, repo_full_name: &str, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, SynthError> {
        self.driver.fetch_file(self.installation_id, repo_full_name, path, git_ref).await.map_err(|e| SynthError::ContextFetch(e.to_string()))
    }
}

#[derive(Deserialize, serde::Serialize)]
struct ProvisionPayload {
    environment_id: Uuid,
}

#[derive(Deserialize, serde::Serialize)]
struct UpdatePayload {
    environment_id: Uuid,
}

#[derive(Deserialize, serde::Serialize)]
struct DestroyPayload {
    environment_id: Uuid,
    merged: bool,
}

pub struct ProvisionEnvironmentHandler(pub Arc<LifecycleController>);

#[async_trait]
impl TaskHandler for ProvisionEnvironmentHandler {
    async fn handle(&self, payload: Value) -> Result<(), JobError> {
        let payload: ProvisionPayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "provision_environment".into(), source: e })?;
        self.0.provision_environment(EnvironmentId(payload.environment_id)).await.map_err(|e| JobError::Handler(e.to_string()))
    }

    async fn on_soft_timeout(&self, payload: Value) -> Result<(), JobError> {
        let payload: ProvisionPayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "provision_environment".into(), source: e })?;
        self.0.mark_timed_out(EnvironmentId(payload.environment_id), "provision_environment").await.map_err(|e| JobError::Handler(e.to_string()))
    }
}

pub struct UpdateEnvironmentHandler(pub Arc<LifecycleController>);

#[async_trait]
impl TaskHandler for UpdateEnvironmentHandler {
    async fn handle(&self, payload: Value) -> Result<(), JobError> {
        let payload: UpdatePayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "update_environment".into(), source: e })?;
        self.0.update_environment(EnvironmentId(payload.environment_id)).await.map_err(|e| JobError::Handler(e.to_string()))
    }

    async fn on_soft_timeout(&self, payload: Value) -> Result<(), JobError> {
        let payload: UpdatePayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "update_environment".into(), source: e })?;
        self.0.mark_timed_out(EnvironmentId(payload.environment_id), "update_environment").await.map_err(|e| JobError::Handler(e.to_string()))
    }
}

pub struct DestroyEnvironmentHandler(pub Arc<LifecycleController>);

#[async_trait]
impl TaskHandler for DestroyEnvironmentHandler {
    async fn handle(&self, payload: Value) -> Result<(), JobError> {
        let payload: DestroyPayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "destroy_environment".into(), source: e })?;
        self.0.destroy_environment(EnvironmentId(payload.environment_id), payload.merged).await.map_err(|e| JobError::Handler(e.to_string()))
    }

    async fn on_soft_timeout(&self, payload: Value) -> Result<(), JobError> {
        let payload: DestroyPayload = serde_json::from_value(payload).map_err(|e| JobError::BadPayload { task: "destroy_environment".into(), source: e })?;
        self.0.mark_timed_out(EnvironmentId(payload.environment_id), "destroy_environment").await.map_err(|e| JobError::Handler(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_driver::DriverError;
    use ephemera_store::memory::InMemoryStore;

    struct FakeCluster {
        fail_apply: bool,
    }

    #[async_trait]
    impl ClusterDriver for FakeCluster {
        async fn create_namespace(&self, _name: &str, _labels: &BTreeMap<String, String>) -> Result<(), DriverError> {
            Ok(())
        }
        async fn delete_namespace(&self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn namespace_exists(&self, _name: &str) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn create_resource_quota(&self, _ns: &str, _c: &str, _m: &str, _p: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn apply_manifest(&self, _manifest: &Value) -> Result<(), DriverError> {
            if self.fail_apply {
                Err(DriverError::Transient("boom".into()))
            } else {
                Ok(())
            }
        }
        async fn get_namespace_status(&self, _name: &str) -> Result<Option<String>, DriverError> {
            Ok(Some("Active".into()))
        }
    }

    struct FakeSourceHost;

    #[async_trait]
    impl SourceHostDriver for FakeSourceHost {
        async fn post_comment(&self, _installation_id: i64, _repo: &str, _pr: i64, _body: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn set_commit_status(
            &self,
            _installation_id: i64,
            _repo: &str,
            _sha: &str,
            _state: CommitState,
            _description: &str,
            _context: &str,
            _target_url: Option<&str>,
        ) -> Result<(), DriverError> {
            Ok(())
        }
        async fn fetch_file(&self, _installation_id: i64, _repo: &str, _path: &str, _git_ref: &str) -> Result<Option<Vec<u8>>, DriverError> {
            Ok(None)
        }
    }

    fn test_jobs() -> JobQueue {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/ephemera_test_unused")
            .expect("lazy pool never dials out until a query runs");
        JobQueue::from_pool(pool)
    }

    fn controller(store: Arc<dyn EnvironmentStore>, fail_apply: bool) -> LifecycleController {
        LifecycleController::new(
            store,
            test_jobs(),
            Arc::new(FakeCluster { fail_apply }),
            Arc::new(FakeSourceHost),
            None,
            "preview.example.com",
        )
    }

    #[tokio::test]
    async fn provision_environment_moves_pending_to_ready() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.create_deployment(env.id, "c", None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.provision_environment(env.id).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Ready);
        assert!(reloaded.last_deployed_at.is_some());
    }

    #[tokio::test]
    async fn provision_environment_is_a_noop_for_already_ready_environments() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Ready, None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.provision_environment(env.id).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Ready);
    }

    #[tokio::test]
    async fn provision_environment_retries_from_stuck_provisioning() {
        // Exercises the reconciler retry path: the sweep sets FAILED -> PROVISIONING
        // and re-enqueues, so the handler must accept re-entry from PROVISIONING.
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.provision_environment(env.id).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Ready);
    }

    #[tokio::test]
    async fn update_environment_fails_when_namespace_is_gone() {
        struct MissingNamespaceCluster;
        #[async_trait]
        impl ClusterDriver for MissingNamespaceCluster {
            async fn create_namespace(&self, _n: &str, _l: &BTreeMap<String, String>) -> Result<(), DriverError> {
                Ok(())
            }
            async fn delete_namespace(&self, _n: &str) -> Result<(), DriverError> {
                Ok(())
            }
            async fn namespace_exists(&self, _n: &str) -> Result<bool, DriverError> {
                Ok(false)
            }
            async fn create_resource_quota(&self, _ns: &str, _c: &str, _m: &str, _p: &str) -> Result<(), DriverError> {
                Ok(())
            }
            async fn apply_manifest(&self, _m: &Value) -> Result<(), DriverError> {
                Ok(())
            }
            async fn get_namespace_status(&self, _n: &str) -> Result<Option<String>, DriverError> {
                Ok(None)
            }
        }

        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Ready, None).await.unwrap();
        store.update_environment_commit(env.id, "d").await.unwrap();

        let lc = LifecycleController::new(
            store.clone(),
            test_jobs(),
            Arc::new(MissingNamespaceCluster),
            Arc::new(FakeSourceHost),
            None,
            "preview.example.com",
        );
        lc.update_environment(env.id).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Failed);
    }

    #[tokio::test]
    async fn destroy_environment_marks_destroyed_on_success() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Destroying, None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.destroy_environment(env.id, true).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Destroyed);
        assert!(reloaded.destroyed_at.is_some());
    }

    #[tokio::test]
    async fn dispatch_opened_creates_environment_and_deployment() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let lc = controller(store.clone(), false);
        let event = PullRequestEvent {
            action: PullRequestAction::OpenedOrReopened,
            repository_full_name: "acme/widget".into(),
            repository_name: "widget".into(),
            pr_number: 7,
            pr_title: "Add feature".into(),
            branch_name: "feat/x".into(),
            commit_sha: "abc123".into(),
            installation_id: None,
            merged: false,
            author: None,
        };

        lc.dispatch_pull_request_event(&event).await.unwrap();

        let env = store.get_environment_by_pr("acme/widget", 7).await.unwrap().unwrap();
        assert_eq!(env.status, EnvironmentStatus::Pending);
        let deployment = store.get_latest_deployment(env.id).await.unwrap();
        assert!(deployment.is_some());

        // Re-delivery of the same webhook is a no-op.
        lc.dispatch_pull_request_event(&event).await.unwrap();
        let all = store.list_environments(&Default::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_opened_finds_or_creates_the_pr_author() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let lc = controller(store.clone(), false);
        let event = PullRequestEvent {
            action: PullRequestAction::OpenedOrReopened,
            repository_full_name: "acme/widget".into(),
            repository_name: "widget".into(),
            pr_number: 7,
            pr_title: "Add feature".into(),
            branch_name: "feat/x".into(),
            commit_sha: "abc123".into(),
            installation_id: None,
            merged: false,
            author: Some(crate::webhook::PullRequestAuthor { github_id: 555, login: "octocat".into(), avatar_url: None }),
        };

        lc.dispatch_pull_request_event(&event).await.unwrap();

        let env = store.get_environment_by_pr("acme/widget", 7).await.unwrap().unwrap();
        let owner_id = env.owner_id.expect("author should have been attached as owner");
        let user = store.find_or_create_user(555, "octocat", None, None).await.unwrap();
        assert_eq!(user.id, owner_id);
    }

    #[tokio::test]
    async fn mark_timed_out_fails_a_provisioning_environment_and_its_deployment() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        let deployment = store.create_deployment(env.id, "c", None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.mark_timed_out(env.id, "provision_environment").await.unwrap();

        let reloaded_env = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded_env.status, EnvironmentStatus::Failed);
        assert!(reloaded_env.error_message.unwrap().contains("soft time limit"));
        let reloaded_deployment = store.get_latest_deployment(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded_deployment.id, deployment.id);
        assert_eq!(reloaded_deployment.status, ephemera_domain::DeploymentStatus::Failed);
    }

    #[tokio::test]
    async fn mark_timed_out_is_a_noop_for_an_environment_already_destroyed() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Destroying, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Destroyed, None).await.unwrap();
        let lc = controller(store.clone(), false);

        lc.mark_timed_out(env.id, "destroy_environment").await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Destroyed);
    }

    #[tokio::test]
    async fn provision_environment_handler_on_soft_timeout_delegates_to_mark_timed_out() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        let lc = Arc::new(controller(store.clone(), false));
        let handler = ProvisionEnvironmentHandler(lc);

        handler.on_soft_timeout(serde_json::json!({ "environment_id": env.id.0 })).await.unwrap();

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Failed);
    }
}
