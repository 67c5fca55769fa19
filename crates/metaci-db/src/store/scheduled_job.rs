//! Repeatable job store.
//!
//! Backs the registrar: a partial unique index keeps at most one enabled
//! job per (name, callable) pair, so registration races surface as
//! `DbError::Duplicate` instead of a second row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaci_core::ResourceId;
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A registered periodic job.
#[derive(Debug, Clone)]
pub struct RepeatableJob {
    pub id: ResourceId,
    pub name: String,
    pub callable: String,
    pub enabled: bool,
    pub interval: i32,
    pub interval_unit: String,
    pub scheduled_time: DateTime<Utc>,
    pub queue: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for registering a job.
#[derive(Debug, Clone)]
pub struct NewRepeatableJob<'a> {
    pub name: &'a str,
    pub callable: &'a str,
    pub interval: i32,
    pub interval_unit: &'a str,
    pub queue: &'a str,
}

#[async_trait]
pub trait ScheduledJobStore: Send + Sync {
    async fn find_enabled(&self, name: &str, callable: &str) -> DbResult<Option<RepeatableJob>>;
    async fn create(
        &self,
        job: NewRepeatableJob<'_>,
        scheduled_time: DateTime<Utc>,
    ) -> DbResult<RepeatableJob>;
}

#[derive(Debug, sqlx::FromRow)]
struct RepeatableJobRow {
    id: uuid::Uuid,
    name: String,
    callable: String,
    enabled: bool,
    interval: i32,
    interval_unit: String,
    scheduled_time: DateTime<Utc>,
    queue: String,
    created_at: DateTime<Utc>,
}

impl From<RepeatableJobRow> for RepeatableJob {
    fn from(row: RepeatableJobRow) -> Self {
        RepeatableJob {
            id: ResourceId::from_uuid(row.id),
            name: row.name,
            callable: row.callable,
            enabled: row.enabled,
            interval: row.interval,
            interval_unit: row.interval_unit,
            scheduled_time: row.scheduled_time,
            queue: row.queue,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of ScheduledJobStore.
pub struct PgScheduledJobStore {
    pool: PgPool,
}

impl PgScheduledJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledJobStore for PgScheduledJobStore {
    async fn find_enabled(&self, name: &str, callable: &str) -> DbResult<Option<RepeatableJob>> {
        let row = sqlx::query_as::<_, RepeatableJobRow>(
            "SELECT * FROM repeatable_jobs WHERE name = $1 AND callable = $2 AND enabled",
        )
        .bind(name)
        .bind(callable)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn create(
        &self,
        job: NewRepeatableJob<'_>,
        scheduled_time: DateTime<Utc>,
    ) -> DbResult<RepeatableJob> {
        let row = sqlx::query_as::<_, RepeatableJobRow>(
            r#"
            INSERT INTO repeatable_jobs
                (id, name, callable, enabled, interval, interval_unit,
                 scheduled_time, queue, created_at)
            VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(job.name)
        .bind(job.callable)
        .bind(job.interval)
        .bind(job.interval_unit)
        .bind(scheduled_time)
        .bind(job.queue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if DbError::is_unique_violation(&e) {
                DbError::Duplicate(format!("repeatable job {}", job.name))
            } else {
                e.into()
            }
        })?;
        Ok(row.into())
    }
}
