//! C5 — Environment Store. The sole writer of `User`, `Environment`, and
//! `Deployment` rows. All mutations validate the status transition graph
//! before committing.

use async_trait::async_trait;
use ephemera_domain::{Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, EnvironmentStatus, User};

use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct ListEnvironmentsFilter {
    pub repository_full_name: Option<String>,
    pub active_only: bool,
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync + 'static {
    // ── Users ────────────────────────────────────────────────────────────────

    async fn find_or_create_user(
        &self,
        github_id: i64,
        login: &str,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, StoreError>;

    // ── Environments ─────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn create_environment(
        &self,
        repository_full_name: &str,
        repository_name: &str,
        pr_number: i64,
        pr_title: &str,
        branch_name: &str,
        commit_sha: &str,
        installation_id: Option<i64>,
        owner_id: Option<ephemera_domain::UserId>,
        base_domain: &str,
    ) -> Result<Environment, StoreError>;

    async fn get_environment_by_pr(&self, repository_full_name: &str, pr_number: i64) -> Result<Option<Environment>, StoreError>;

    async fn get_environment_by_namespace(&self, namespace: &str) -> Result<Option<Environment>, StoreError>;

    async fn get_environment_by_id(&self, id: EnvironmentId) -> Result<Option<Environment>, StoreError>;

    async fn list_environments(&self, filter: &ListEnvironmentsFilter) -> Result<Vec<Environment>, StoreError>;

    async fn list_active_environments(&self) -> Result<Vec<Environment>, StoreError>;

    /// Validates `current.status.can_transition_to(next)` before writing.
    /// Sets `last_deployed_at` on first entry into READY and `destroyed_at`
    /// on entry into DESTROYED.
    async fn update_environment_status(
        &self,
        id: EnvironmentId,
        next: EnvironmentStatus,
        error_message: Option<&str>,
    ) -> Result<Environment, StoreError>;

    /// Updates `commit_sha` and moves the environment to UPDATING.
    async fn update_environment_commit(&self, id: EnvironmentId, commit_sha: &str) -> Result<Environment, StoreError>;

    // ── Deployments ──────────────────────────────────────────────────────────

    async fn create_deployment(
        &self,
        environment_id: EnvironmentId,
        commit_sha: &str,
        commit_message: Option<&str>,
    ) -> Result<Deployment, StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn update_deployment_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error_message: Option<&str>,
        logs: Option<&str>,
        ai_generated: Option<bool>,
        ai_plan: Option<&str>,
        ai_fallback_reason: Option<&str>,
    ) -> Result<Deployment, StoreError>;

    async fn get_latest_deployment(&self, environment_id: EnvironmentId) -> Result<Option<Deployment>, StoreError>;

    async fn list_deployments_for_environment(&self, environment_id: EnvironmentId) -> Result<Vec<Deployment>, StoreError>;

    // ── Reconciliation support ──────────────────────────────────────────────

    /// Environments whose `status` equals `status` and whose `updated_at` is
    /// older than `older_than`. Used by the reconciler's stuck-state sweeps.
    async fn list_environments_by_status_older_than(
        &self,
        status: EnvironmentStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Environment>, StoreError>;

    /// Permanently removes DESTROYED environments whose `destroyed_at` is
    /// older than `older_than`. Returns the number of rows removed.
    async fn purge_destroyed_environments_older_than(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError>;
}
