//! In-memory `EnvironmentStore`, used by the test suites of the crates that
//! depend on this one and by `ephemera-cli` when no `DATABASE_URL` is set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ephemera_domain::{Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, EnvironmentStatus, User, UserId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{EnvironmentStore, ListEnvironmentsFilter};

#[derive(Default)]
struct Inner {
    users_by_github_id: HashMap<i64, UserId>,
    users: HashMap<UserId, User>,
    environments: HashMap<EnvironmentId, Environment>,
    deployments: HashMap<DeploymentId, Deployment>,
}

/// `Arc<RwLock<Inner>>` wrapping plain `HashMap`s. Single-process only; every
/// call locks the whole store, which is fine at test scale.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvironmentStore for InMemoryStore {
    async fn find_or_create_user(
        &self,
        github_id: i64,
        login: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.users_by_github_id.get(&github_id).copied() {
            let user = inner.users.get_mut(&id).expect("indexed user must exist");
            if email.is_some() {
                user.email = email.map(str::to_string);
            }
            if avatar_url.is_some() {
                user.avatar_url = avatar_url.map(str::to_string);
            }
            user.login = login.to_string();
            user.updated_at = Utc::now();
            return Ok(user.clone());
        }

        let mut user = User::new(github_id, login);
        user.email = email.map(str::to_string);
        user.avatar_url = avatar_url.map(str::to_string);
        inner.users_by_github_id.insert(github_id, user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_environment(
        &self,
        repository_full_name: &str,
        repository_name: &str,
        pr_number: i64,
        pr_title: &str,
        branch_name: &str,
        commit_sha: &str,
        installation_id: Option<i64>,
        owner_id: Option<UserId>,
        base_domain: &str,
    ) -> Result<Environment, StoreError> {
        let environment = Environment::new(
            repository_full_name,
            repository_name,
            pr_number,
            pr_title,
            branch_name,
            commit_sha,
            installation_id,
            owner_id,
            base_domain,
        );
        self.inner.write().await.environments.insert(environment.id, environment.clone());
        Ok(environment)
    }

    async fn get_environment_by_pr(&self, repository_full_name: &str, pr_number: i64) -> Result<Option<Environment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .environments
            .values()
            .find(|e| e.repository_full_name == repository_full_name && e.pr_number == pr_number)
            .cloned())
    }

    async fn get_environment_by_namespace(&self, namespace: &str) -> Result<Option<Environment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.environments.values().find(|e| e.namespace == namespace).cloned())
    }

    async fn get_environment_by_id(&self, id: EnvironmentId) -> Result<Option<Environment>, StoreError> {
        Ok(self.inner.read().await.environments.get(&id).cloned())
    }

    async fn list_environments(&self, filter: &ListEnvironmentsFilter) -> Result<Vec<Environment>, StoreError> {
        let inner = self.inner.read().await;
        let mut envs: Vec<Environment> = inner
            .environments
            .values()
            .filter(|e| match &filter.repository_full_name {
                Some(name) => &e.repository_full_name == name,
                None => true,
            })
            .filter(|e| !filter.active_only || e.status.is_active())
            .cloned()
            .collect();
        envs.sort_by_key(|e| e.created_at);
        Ok(envs)
    }

    async fn list_active_environments(&self) -> Result<Vec<Environment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.environments.values().filter(|e| e.status.is_active()).cloned().collect())
    }

    async fn update_environment_status(
        &self,
        id: EnvironmentId,
        next: EnvironmentStatus,
        error_message: Option<&str>,
    ) -> Result<Environment, StoreError> {
        let mut inner = self.inner.write().await;
        let env = inner.environments.get_mut(&id).ok_or_else(|| StoreError::EnvironmentNotFound(id.to_string()))?;

        if env.status != next && !env.status.can_transition_to(next) {
            return Err(StoreError::Domain(ephemera_domain::DomainError::IllegalTransition {
                from: env.status.to_string(),
                to: next.to_string(),
            }));
        }

        let now = Utc::now();
        if next == EnvironmentStatus::Ready && env.last_deployed_at.is_none() {
            env.last_deployed_at = Some(now);
        }
        if next == EnvironmentStatus::Destroyed {
            env.destroyed_at = Some(now);
        }
        env.status = next;
        env.error_message = error_message.map(str::to_string);
        env.updated_at = now;
        Ok(env.clone())
    }

    async fn update_environment_commit(&self, id: EnvironmentId, commit_sha: &str) -> Result<Environment, StoreError> {
        let mut inner = self.inner.write().await;
        let env = inner.environments.get_mut(&id).ok_or_else(|| StoreError::EnvironmentNotFound(id.to_string()))?;
        if !env.status.can_transition_to(EnvironmentStatus::Updating) {
            return Err(StoreError::Domain(ephemera_domain::DomainError::IllegalTransition {
                from: env.status.to_string(),
                to: EnvironmentStatus::Updating.to_string(),
            }));
        }
        env.commit_sha = commit_sha.to_string();
        env.status = EnvironmentStatus::Updating;
        env.updated_at = Utc::now();
        Ok(env.clone())
    }

    async fn create_deployment(
        &self,
        environment_id: EnvironmentId,
        commit_sha: &str,
        commit_message: Option<&str>,
    ) -> Result<Deployment, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.environments.contains_key(&environment_id) {
            return Err(StoreError::EnvironmentNotFound(environment_id.to_string()));
        }
        let deployment = Deployment::new(environment_id, commit_sha, commit_message.map(str::to_string));
        inner.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn update_deployment_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error_message: Option<&str>,
        logs: Option<&str>,
        ai_generated: Option<bool>,
        ai_plan: Option<&str>,
        ai_fallback_reason: Option<&str>,
    ) -> Result<Deployment, StoreError> {
        let mut inner = self.inner.write().await;
        let deployment = inner.deployments.get_mut(&id).ok_or_else(|| StoreError::DeploymentNotFound(id.to_string()))?;
        if deployment.status.is_terminal() {
            return Err(StoreError::Internal(format!("deployment {id} is already in a terminal state")));
        }
        deployment.status = status;
        if let Some(msg) = error_message {
            deployment.error_message = Some(msg.to_string());
        }
        if let Some(logs) = logs {
            deployment.logs = Some(logs.to_string());
        }
        if let Some(ai_generated) = ai_generated {
            deployment.ai_generated = ai_generated;
        }
        if let Some(ai_plan) = ai_plan {
            deployment.ai_plan = Some(ai_plan.to_string());
        }
        if let Some(reason) = ai_fallback_reason {
            deployment.ai_fallback_reason = Some(reason.to_string());
        }
        if status.is_terminal() {
            deployment.completed_at = Some(Utc::now());
        }
        Ok(deployment.clone())
    }

    async fn get_latest_deployment(&self, environment_id: EnvironmentId) -> Result<Option<Deployment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .deployments
            .values()
            .filter(|d| d.environment_id == environment_id)
            .max_by_key(|d| d.started_at)
            .cloned())
    }

    async fn list_deployments_for_environment(&self, environment_id: EnvironmentId) -> Result<Vec<Deployment>, StoreError> {
        let inner = self.inner.read().await;
        let mut deployments: Vec<Deployment> = inner.deployments.values().filter(|d| d.environment_id == environment_id).cloned().collect();
        deployments.sort_by_key(|d| d.started_at);
        Ok(deployments)
    }

    async fn list_environments_by_status_older_than(
        &self,
        status: EnvironmentStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Environment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.environments.values().filter(|e| e.status == status && e.updated_at < older_than).cloned().collect())
    }

    async fn purge_destroyed_environments_older_than(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let to_remove: Vec<EnvironmentId> = inner
            .environments
            .values()
            .filter(|e| e.status == EnvironmentStatus::Destroyed && e.destroyed_at.map(|d| d < older_than).unwrap_or(false))
            .map(|e| e.id)
            .collect();
        let removed = to_remove.len() as u64;
        for id in to_remove {
            inner.environments.remove(&id);
            inner.deployments.retain(|_, d| d.environment_id != id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_or_create_user_is_idempotent_on_github_id() {
        let store = InMemoryStore::new();
        let a = store.find_or_create_user(1, "octocat", None, None).await.unwrap();
        let b = store.find_or_create_user(1, "octocat", Some("o@example.com"), None).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.email.as_deref(), Some("o@example.com"));
    }

    #[tokio::test]
    async fn create_and_fetch_environment_round_trips() {
        let store = InMemoryStore::new();
        let env = store
            .create_environment("acme/widget", "widget", 7, "Add feature", "feat/x", "abc123", Some(99), None, "preview.example.com")
            .await
            .unwrap();
        let fetched = store.get_environment_by_pr("acme/widget", 7).await.unwrap().unwrap();
        assert_eq!(fetched.id, env.id);
        let by_ns = store.get_environment_by_namespace(&env.namespace).await.unwrap().unwrap();
        assert_eq!(by_ns.id, env.id);
    }

    #[tokio::test]
    async fn status_transition_rejects_illegal_jump() {
        let store = InMemoryStore::new();
        let env = store
            .create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        let result = store.update_environment_status(env.id, EnvironmentStatus::Destroyed, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn status_transition_sets_last_deployed_and_destroyed_timestamps() {
        let store = InMemoryStore::new();
        let env = store
            .create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        let ready = store.update_environment_status(env.id, EnvironmentStatus::Ready, None).await.unwrap();
        assert!(ready.last_deployed_at.is_some());

        store.update_environment_status(env.id, EnvironmentStatus::Destroying, None).await.unwrap();
        let destroyed = store.update_environment_status(env.id, EnvironmentStatus::Destroyed, None).await.unwrap();
        assert!(destroyed.destroyed_at.is_some());
    }

    #[tokio::test]
    async fn deployment_status_refuses_mutation_after_terminal() {
        let store = InMemoryStore::new();
        let env = store
            .create_environment("acme/widget", "widget", 7, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        let deployment = store.create_deployment(env.id, "abc123", None).await.unwrap();
        store
            .update_deployment_status(deployment.id, DeploymentStatus::Success, None, None, None, None, None)
            .await
            .unwrap();
        let result = store
            .update_deployment_status(deployment.id, DeploymentStatus::Failed, None, None, None, None, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_environments_filters_by_repository_and_active() {
        let store = InMemoryStore::new();
        let a = store
            .create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        store.create_environment("acme/other", "other", 2, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Ready, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Destroying, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Destroyed, None).await.unwrap();

        let filtered = store
            .list_environments(&ListEnvironmentsFilter { repository_full_name: Some("acme/widget".into()), active_only: false })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let active = store.list_environments(&ListEnvironmentsFilter { repository_full_name: None, active_only: true }).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_old_destroyed_environments() {
        let store = InMemoryStore::new();
        let a = store
            .create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Ready, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Destroying, None).await.unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Destroyed, None).await.unwrap();

        let not_yet = store.purge_destroyed_environments_older_than(Utc::now() - chrono::Duration::days(30)).await.unwrap();
        assert_eq!(not_yet, 0);

        let removed = store.purge_destroyed_environments_older_than(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_environment_by_id(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_status_older_than_finds_stuck_environments() {
        let store = InMemoryStore::new();
        let a = store
            .create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com")
            .await
            .unwrap();
        store.update_environment_status(a.id, EnvironmentStatus::Provisioning, None).await.unwrap();

        let stuck = store
            .list_environments_by_status_older_than(EnvironmentStatus::Provisioning, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);

        let not_stuck = store
            .list_environments_by_status_older_than(EnvironmentStatus::Provisioning, Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert!(not_stuck.is_empty());
    }
}
