//! Durable task queue backed by PostgreSQL. Stands in for the message broker
//! the original Celery deployment uses (see crate docs): `SELECT ... FOR
//! UPDATE SKIP LOCKED` hands one queued row to one worker at a time, which
//! gives the same prefetch=1 / at-least-once semantics without a second
//! infrastructure dependency.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::JobError;

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            UUID PRIMARY KEY,
    queue         TEXT NOT NULL,
    task_name     TEXT NOT NULL,
    payload       JSONB NOT NULL,
    status        TEXT NOT NULL,
    attempt       INT NOT NULL DEFAULT 0,
    locked_by     TEXT,
    error_message TEXT,
    enqueued_at   TIMESTAMPTZ NOT NULL,
    started_at    TIMESTAMPTZ,
    completed_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs (queue, status, enqueued_at);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, JobError> {
        Ok(match s {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            other => return Err(JobError::Storage(format!("unrecognized job status '{other}'"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempt: i32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

fn row_to_task(row: &PgRow) -> Result<Task, JobError> {
    let status_raw: String = row.try_get("status").map_err(|e| JobError::Storage(e.to_string()))?;
    Ok(Task {
        id: row.try_get("id").map_err(|e| JobError::Storage(e.to_string()))?,
        queue: row.try_get("queue").map_err(|e| JobError::Storage(e.to_string()))?,
        task_name: row.try_get("task_name").map_err(|e| JobError::Storage(e.to_string()))?,
        payload: row.try_get("payload").map_err(|e| JobError::Storage(e.to_string()))?,
        status: JobStatus::parse(&status_raw)?,
        attempt: row.try_get("attempt").map_err(|e| JobError::Storage(e.to_string()))?,
        enqueued_at: row.try_get("enqueued_at").map_err(|e| JobError::Storage(e.to_string()))?,
        started_at: row.try_get("started_at").map_err(|e| JobError::Storage(e.to_string()))?,
    })
}

/// Result rows are retained for this long after completion, after which
/// [`JobQueue::purge_old_results`] removes them.
pub const RESULT_RETENTION: ChronoDuration = ChronoDuration::hours(1);

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub async fn connect(url: &str) -> Result<Self, JobError> {
        let pool = PgPool::connect(url).await.map_err(|e| JobError::Storage(format!("connect: {e}")))?;
        let queue = Self { pool };
        queue.migrate().await?;
        Ok(queue)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), JobError> {
        sqlx::query(MIGRATIONS).execute(&self.pool).await.map_err(|e| JobError::Storage(format!("migration: {e}")))?;
        Ok(())
    }

    /// Enqueue is synchronous and at-least-once: the row is committed before
    /// this call returns.
    pub async fn submit<P: Serialize>(&self, queue: &str, task_name: &str, payload: &P) -> Result<Uuid, JobError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(payload).map_err(|e| JobError::BadPayload { task: task_name.to_string(), source: e })?;
        sqlx::query(
            "INSERT INTO jobs (id, queue, task_name, payload, status, enqueued_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(queue)
        .bind(task_name)
        .bind(payload)
        .bind(JobStatus::Queued.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Atomically claims the oldest queued task on `queue`, if any, locking
    /// the row with `FOR UPDATE SKIP LOCKED` so concurrent workers never pull
    /// the same task (prefetch = 1 per worker).
    pub async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<Task>, JobError> {
        let mut tx = self.pool.begin().await.map_err(|e| JobError::Storage(e.to_string()))?;
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1 AND status = 'queued'
            ORDER BY enqueued_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| JobError::Storage(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.map_err(|e| JobError::Storage(e.to_string()))?;
            return Ok(None);
        };
        let mut task = row_to_task(&row)?;

        sqlx::query("UPDATE jobs SET status = 'running', locked_by = $2, started_at = $3, attempt = attempt + 1 WHERE id = $1")
            .bind(task.id)
            .bind(worker_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| JobError::Storage(e.to_string()))?;
        tx.commit().await.map_err(|e| JobError::Storage(e.to_string()))?;

        task.status = JobStatus::Running;
        task.attempt += 1;
        Ok(Some(task))
    }

    /// Late-ack: only called after the handler returns `Ok`.
    pub async fn complete(&self, id: Uuid) -> Result<(), JobError> {
        sqlx::query("UPDATE jobs SET status = 'succeeded', completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, error_message: &str) -> Result<(), JobError> {
        sqlx::query("UPDATE jobs SET status = 'failed', completed_at = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Redelivery: tasks left `running` past `hard_limit` after a worker died
    /// mid-task (no ack arrived) are put back on the queue.
    pub async fn requeue_stale(&self, hard_limit: ChronoDuration) -> Result<u64, JobError> {
        let threshold = Utc::now() - hard_limit;
        let result = sqlx::query("UPDATE jobs SET status = 'queued', locked_by = NULL, started_at = NULL WHERE status = 'running' AND started_at < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Deletes terminal rows older than [`RESULT_RETENTION`].
    pub async fn purge_old_results(&self) -> Result<u64, JobError> {
        let threshold = Utc::now() - RESULT_RETENTION;
        let result = sqlx::query("DELETE FROM jobs WHERE status IN ('succeeded', 'failed') AND completed_at < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
