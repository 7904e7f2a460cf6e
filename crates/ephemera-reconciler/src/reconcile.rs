//! Periodic reconciliation (subcomponent of C6/C8). Runs as the
//! `cleanup_stale_environments` task, driven hourly by
//! `ephemera_jobs::run_scheduler`. Five sweeps, the first three mandatory,
//! the last two optional and parameterized:
//!
//! 1. Stuck provisioning: PROVISIONING for longer than a threshold ⇒ delete
//!    the namespace, mark FAILED.
//! 2. Stuck destroying: DESTROYING for longer than a threshold ⇒ delete the
//!    namespace, mark DESTROYED regardless of the delete's outcome.
//! 3. Drift: READY whose namespace no longer exists ⇒ mark FAILED.
//! 4. (optional) Purge DESTROYED rows older than `destroyed_retention_days`.
//! 5. (optional) Re-enqueue FAILED environments updated within
//!    `failed_retry_window_hours`, moving them back to PROVISIONING.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ephemera_domain::EnvironmentStatus;
use ephemera_driver::ClusterDriver;
use ephemera_jobs::{JobError, JobQueue, TaskHandler, ENVIRONMENT_QUEUE};
use ephemera_store::EnvironmentStore;
use serde_json::Value;

use crate::error::ReconcileError;
use crate::report::{Change, ReconcileReport};

pub struct ReconcilerConfig {
    pub stale_provisioning_threshold: Duration,
    pub stale_destroying_threshold: Duration,
    pub destroyed_retention: Option<Duration>,
    pub failed_retry_window: Option<Duration>,
}

pub struct Reconciler {
    store: Arc<dyn EnvironmentStore>,
    cluster: Arc<dyn ClusterDriver>,
    jobs: JobQueue,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EnvironmentStore>, cluster: Arc<dyn ClusterDriver>, jobs: JobQueue, config: ReconcilerConfig) -> Self {
        Reconciler { store, cluster, jobs, config }
    }

    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        report.merge(self.sweep_stuck_provisioning().await?);
        report.merge(self.sweep_stuck_destroying().await?);
        report.merge(self.sweep_drift().await?);
        if let Some(retention) = self.config.destroyed_retention {
            report.merge(self.sweep_purge_destroyed(retention).await?);
        }
        if let Some(window) = self.config.failed_retry_window {
            report.merge(self.sweep_retry_failed(window).await?);
        }
        Ok(report)
    }

    async fn sweep_stuck_provisioning(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        let threshold = Utc::now() - self.config.stale_provisioning_threshold;
        let stuck = self.store.list_environments_by_status_older_than(EnvironmentStatus::Provisioning, threshold).await?;
        for env in stuck {
            if let Err(e) = self.cluster.delete_namespace(&env.namespace).await {
                tracing::warn!(environment_id = %env.id, namespace = %env.namespace, error = %e, "failed to delete namespace for stuck-provisioning environment");
            }
            self.store.update_environment_status(env.id, EnvironmentStatus::Failed, Some("stuck in provisioning")).await?;
            tracing::info!(environment_id = %env.id, namespace = %env.namespace, "reconciler: marked stuck-provisioning environment as failed");
            report.changes.push(Change::MarkedFailedStuckProvisioning { environment_id: env.id });
        }
        Ok(report)
    }

    async fn sweep_stuck_destroying(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        let threshold = Utc::now() - self.config.stale_destroying_threshold;
        let stuck = self.store.list_environments_by_status_older_than(EnvironmentStatus::Destroying, threshold).await?;
        for env in stuck {
            if let Err(e) = self.cluster.delete_namespace(&env.namespace).await {
                tracing::warn!(environment_id = %env.id, namespace = %env.namespace, error = %e, "failed to delete namespace for stuck-destroying environment, marking destroyed regardless");
            }
            self.store.update_environment_status(env.id, EnvironmentStatus::Destroyed, None).await?;
            tracing::info!(environment_id = %env.id, namespace = %env.namespace, "reconciler: marked stuck-destroying environment as destroyed");
            report.changes.push(Change::MarkedDestroyedStuckDestroying { environment_id: env.id });
        }
        Ok(report)
    }

    async fn sweep_drift(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        let all = self.store.list_environments(&Default::default()).await?;
        for env in all.into_iter().filter(|e| e.status == EnvironmentStatus::Ready) {
            let exists = self.cluster.namespace_exists(&env.namespace).await?;
            if !exists {
                self.store.update_environment_status(env.id, EnvironmentStatus::Failed, Some("namespace no longer exists")).await?;
                tracing::info!(environment_id = %env.id, namespace = %env.namespace, "reconciler: detected drift, namespace gone");
                report.changes.push(Change::MarkedFailedDrift { environment_id: env.id });
            }
        }
        Ok(report)
    }

    async fn sweep_purge_destroyed(&self, retention: Duration) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        let threshold = Utc::now() - retention;
        let all = self.store.list_environments(&Default::default()).await?;
        let stale_ids: Vec<_> = all
            .into_iter()
            .filter(|e| e.status == EnvironmentStatus::Destroyed && e.destroyed_at.map(|d| d < threshold).unwrap_or(false))
            .map(|e| e.id)
            .collect();

        let removed = self.store.purge_destroyed_environments_older_than(threshold).await?;
        if removed > 0 {
            tracing::info!(count = removed, "reconciler: purged old destroyed environments");
        }
        for environment_id in stale_ids {
            report.changes.push(Change::PurgedDestroyed { environment_id });
        }
        Ok(report)
    }

    async fn sweep_retry_failed(&self, window: Duration) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new();
        let threshold = Utc::now() - window;
        let failed = self.store.list_environments_by_status_older_than(EnvironmentStatus::Failed, Utc::now()).await?;
        for env in failed.into_iter().filter(|e| e.updated_at >= threshold) {
            self.store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await?;
            self.jobs.submit(ENVIRONMENT_QUEUE, "provision_environment", &serde_json::json!({ "environment_id": env.id.0 })).await?;
            tracing::info!(environment_id = %env.id, "reconciler: retrying recently-failed environment");
            report.changes.push(Change::RetriedFailed { environment_id: env.id });
        }
        Ok(report)
    }
}

#[async_trait]
impl TaskHandler for Reconciler {
    async fn handle(&self, _payload: Value) -> Result<(), JobError> {
        let report = self.run().await.map_err(|e| JobError::Handler(e.to_string()))?;
        if !report.errors.is_empty() {
            tracing::warn!(errors = ?report.errors, "reconciliation pass completed with errors");
        }
        tracing::info!(changes = report.changes.len(), "reconciliation pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_driver::DriverError;
    use ephemera_store::memory::InMemoryStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeCluster {
        namespace_exists: AtomicBool,
    }

    #[async_trait]
    impl ClusterDriver for FakeCluster {
        async fn create_namespace(&self, _name: &str, _labels: &BTreeMap<String, String>) -> Result<(), DriverError> {
            Ok(())
        }
        async fn delete_namespace(&self, _name: &str) -> Result<(), DriverError> {
            self.namespace_exists.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn namespace_exists(&self, _name: &str) -> Result<bool, DriverError> {
            Ok(self.namespace_exists.load(Ordering::SeqCst))
        }
        async fn create_resource_quota(&self, _ns: &str, _c: &str, _m: &str, _p: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn apply_manifest(&self, _manifest: &Value) -> Result<(), DriverError> {
            Ok(())
        }
        async fn get_namespace_status(&self, _name: &str) -> Result<Option<String>, DriverError> {
            Ok(None)
        }
    }

    fn test_jobs() -> JobQueue {
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/ephemera_test_unused").unwrap();
        JobQueue::from_pool(pool)
    }

    fn default_config() -> ReconcilerConfig {
        ReconcilerConfig {
            stale_provisioning_threshold: Duration::minutes(30),
            stale_destroying_threshold: Duration::minutes(30),
            destroyed_retention: None,
            failed_retry_window: None,
        }
    }

    #[tokio::test]
    async fn sweep_marks_stuck_provisioning_environments_failed() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FakeCluster { namespace_exists: AtomicBool::new(true) }),
            test_jobs(),
            ReconcilerConfig { stale_provisioning_threshold: Duration::minutes(-1), ..default_config() },
        );

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.changes.len(), 1);
        assert!(matches!(report.changes[0], Change::MarkedFailedStuckProvisioning { .. }));

        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Failed);
        assert_eq!(reloaded.error_message.as_deref(), Some("stuck in provisioning"));
    }

    #[tokio::test]
    async fn fresh_provisioning_environments_are_left_alone() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FakeCluster { namespace_exists: AtomicBool::new(true) }),
            test_jobs(),
            default_config(),
        );

        let report = reconciler.run().await.unwrap();
        assert!(report.changes.is_empty());
        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Provisioning);
    }

    #[tokio::test]
    async fn drift_sweep_fails_ready_environments_with_missing_namespace() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Ready, None).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FakeCluster { namespace_exists: AtomicBool::new(false) }),
            test_jobs(),
            default_config(),
        );

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.changes.len(), 1);
        assert!(matches!(report.changes[0], Change::MarkedFailedDrift { .. }));
        let reloaded = store.get_environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnvironmentStatus::Failed);
    }

    #[tokio::test]
    async fn purge_sweep_removes_old_destroyed_rows_when_configured() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let env = store.create_environment("acme/widget", "widget", 1, "t", "b", "c", None, None, "preview.example.com").await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Provisioning, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Ready, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Destroying, None).await.unwrap();
        store.update_environment_status(env.id, EnvironmentStatus::Destroyed, None).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FakeCluster { namespace_exists: AtomicBool::new(false) }),
            test_jobs(),
            ReconcilerConfig { destroyed_retention: Some(Duration::seconds(-1)), ..default_config() },
        );

        let report = reconciler.run().await.unwrap();
        assert!(report.changes.iter().any(|c| matches!(c, Change::PurgedDestroyed { .. })));
        assert!(store.get_environment_by_id(env.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_sweep_is_inactive_without_a_configured_window() {
        let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), Arc::new(FakeCluster { namespace_exists: AtomicBool::new(true) }), test_jobs(), default_config());
        let report = reconciler.run().await.unwrap();
        assert!(report.changes.is_empty());
    }
}
