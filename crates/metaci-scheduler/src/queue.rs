//! Dispatch queue handing promoted builds to external runners.
//!
//! Backed by PostgreSQL; runners claim entries with SKIP LOCKED so
//! multiple runners never grab the same build.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaci_core::executor::{DispatchError, DispatchRequest, Executor};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A dispatched build awaiting or undergoing execution.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedBuild {
    pub id: uuid::Uuid,
    pub build_id: uuid::Uuid,
    pub plan_name: String,
    pub org: String,
    pub commit_sha: String,
    pub priority: i32,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Build dispatch queue backed by PostgreSQL.
pub struct BuildQueue {
    pool: PgPool,
}

impl BuildQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a promoted build for an external runner.
    pub async fn enqueue(&self, request: &DispatchRequest) -> Result<QueuedBuild, sqlx::Error> {
        let entry = sqlx::query_as::<_, QueuedBuild>(
            r#"
            INSERT INTO build_queue
                (id, build_id, plan_name, org, commit_sha, priority, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(request.build_id.as_uuid())
        .bind(&request.plan_name)
        .bind(&request.org)
        .bind(&request.commit_sha)
        .bind(request.priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Claim the next available entry.
    /// Uses SKIP LOCKED to prevent contention between runners.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<QueuedBuild>, sqlx::Error> {
        let entry = sqlx::query_as::<_, QueuedBuild>(
            r#"
            UPDATE build_queue
            SET status = 'claimed', claimed_by = $1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM build_queue
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Mark an entry as completed.
    pub async fn complete(&self, id: uuid::Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE build_queue SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark an entry as failed.
    pub async fn fail(&self, id: uuid::Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE build_queue SET status = 'failed', error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release a claimed entry back to pending (e.g., on runner crash
    /// recovery).
    pub async fn release(&self, id: uuid::Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE build_queue SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Executor for BuildQueue {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        // A failed insert leaves the build requeued; the next tick retries.
        self.enqueue(&request)
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::Transient(e.to_string()))
    }
}
