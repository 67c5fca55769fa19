//! Build record store.
//!
//! Admission deduplication and the queued/waiting -> running transition are
//! single statements so concurrent callers cannot observe partial state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaci_core::ResourceId;
use metaci_core::build::{Build, BuildStatus};
use metaci_core::plan::Plan;
use metaci_core::trigger::TriggerKind;
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Fields for admitting a build.
#[derive(Debug, Clone)]
pub struct NewBuild<'a> {
    pub planrepo_id: ResourceId,
    pub branch: &'a str,
    pub commit_sha: &'a str,
    pub commit_message: Option<&'a str>,
    pub org: &'a str,
    pub priority: i32,
}

/// Result of an admission attempt: the build, and whether this call
/// created it or found an existing non-terminal one.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub build: Build,
    pub created: bool,
}

/// A queued or waiting build joined with its current plan, as scanned by
/// the scheduler tick.
#[derive(Debug, Clone)]
pub struct PendingBuild {
    pub build: Build,
    pub plan: Plan,
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Atomic check-and-insert: creates a queued build unless a non-terminal
    /// build already exists for the same (binding, commit) pair.
    async fn admit(&self, new: NewBuild<'_>) -> DbResult<Admitted>;
    async fn get(&self, id: ResourceId) -> DbResult<Build>;
    async fn list_recent(&self, limit: i64) -> DbResult<Vec<Build>>;
    /// Queued and waiting builds, highest priority first, oldest first
    /// within a priority level.
    async fn list_pending(&self) -> DbResult<Vec<PendingBuild>>;
    /// Promote to running unless the scope's running count has reached
    /// `limit`. Returns whether the build was promoted.
    async fn try_start(
        &self,
        id: ResourceId,
        plan_id: ResourceId,
        org: &str,
        limit: i64,
    ) -> DbResult<bool>;
    /// Park a queued build behind a concurrency limit.
    async fn mark_waiting(&self, id: ResourceId) -> DbResult<()>;
    /// Return a running build to the queue after a transient dispatch
    /// failure.
    async fn requeue(&self, id: ResourceId) -> DbResult<()>;
    /// Mark a non-terminal build errored with a message.
    async fn mark_error(&self, id: ResourceId, message: &str) -> DbResult<()>;
    /// Record the terminal state reported by the executor.
    async fn finish(
        &self,
        id: ResourceId,
        status: BuildStatus,
        log: Option<&str>,
    ) -> DbResult<Build>;
    /// Cancel a non-terminal build. Returns false if it already reached a
    /// terminal state.
    async fn cancel(&self, id: ResourceId) -> DbResult<bool>;
}

#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    id: uuid::Uuid,
    planrepo_id: uuid::Uuid,
    branch: String,
    commit_sha: String,
    commit_message: Option<String>,
    org: String,
    priority: i32,
    status: String,
    log: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRow> for Build {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Build> {
        let status: BuildStatus = row
            .status
            .parse()
            .map_err(|e| DbError::InvalidRecord(format!("build {}: {}", row.id, e)))?;
        Ok(Build {
            id: ResourceId::from_uuid(row.id),
            planrepo_id: ResourceId::from_uuid(row.planrepo_id),
            branch: row.branch,
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            org: row.org,
            priority: row.priority,
            status,
            log: row.log,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    #[sqlx(flatten)]
    build: BuildRow,
    plan_id: uuid::Uuid,
    plan_name: String,
    plan_description: Option<String>,
    plan_trigger: String,
    plan_regex: Option<String>,
    plan_org: String,
    plan_priority: i32,
    plan_concurrency_limit: i32,
    plan_active: bool,
    plan_public: bool,
}

impl PendingRow {
    fn into_pending(self) -> DbResult<PendingBuild> {
        let trigger: TriggerKind = self
            .plan_trigger
            .parse()
            .map_err(|e| DbError::InvalidRecord(format!("plan {}: {}", self.plan_id, e)))?;
        let plan = Plan {
            id: ResourceId::from_uuid(self.plan_id),
            name: self.plan_name,
            description: self.plan_description,
            trigger,
            regex: self.plan_regex,
            org: self.plan_org,
            priority: self.plan_priority,
            concurrency_limit: self.plan_concurrency_limit,
            active: self.plan_active,
            public: self.plan_public,
        };
        Ok(PendingBuild {
            build: self.build.try_into()?,
            plan,
        })
    }
}

const NON_TERMINAL: &str = "('queued', 'waiting', 'running')";

/// PostgreSQL implementation of BuildStore.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn admit(&self, new: NewBuild<'_>) -> DbResult<Admitted> {
        // Insert and lookup race against concurrent admissions of the same
        // (binding, commit); the partial unique index keeps at most one live
        // row, so a couple of attempts always converge.
        for _ in 0..3 {
            let insert = format!(
                r#"
                INSERT INTO builds
                    (id, planrepo_id, branch, commit_sha, commit_message, org,
                     priority, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', NOW())
                ON CONFLICT (planrepo_id, commit_sha)
                    WHERE status IN {NON_TERMINAL}
                    DO NOTHING
                RETURNING *
                "#
            );
            let inserted = sqlx::query_as::<_, BuildRow>(&insert)
                .bind(uuid::Uuid::now_v7())
                .bind(new.planrepo_id.as_uuid())
                .bind(new.branch)
                .bind(new.commit_sha)
                .bind(new.commit_message)
                .bind(new.org)
                .bind(new.priority)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = inserted {
                return Ok(Admitted {
                    build: row.try_into()?,
                    created: true,
                });
            }

            let select = format!(
                r#"
                SELECT * FROM builds
                WHERE planrepo_id = $1 AND commit_sha = $2 AND status IN {NON_TERMINAL}
                "#
            );
            let existing = sqlx::query_as::<_, BuildRow>(&select)
                .bind(new.planrepo_id.as_uuid())
                .bind(new.commit_sha)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = existing {
                return Ok(Admitted {
                    build: row.try_into()?,
                    created: false,
                });
            }
        }
        Err(DbError::Duplicate(format!(
            "admission of {} on binding {} did not converge",
            new.commit_sha, new.planrepo_id
        )))
    }

    async fn get(&self, id: ResourceId) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        row.try_into()
    }

    async fn list_recent(&self, limit: i64) -> DbResult<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_pending(&self) -> DbResult<Vec<PendingBuild>> {
        let query = r#"
            SELECT b.*,
                   p.id AS plan_id, p.name AS plan_name, p.description AS plan_description,
                   p.trigger AS plan_trigger, p.regex AS plan_regex, p.org AS plan_org,
                   p.priority AS plan_priority, p.concurrency_limit AS plan_concurrency_limit,
                   p.active AS plan_active, p.public AS plan_public
            FROM builds b
            JOIN plan_repositories pr ON pr.id = b.planrepo_id
            JOIN plans p ON p.id = pr.plan_id
            WHERE b.status IN ('queued', 'waiting')
            ORDER BY b.priority DESC, b.created_at ASC
        "#;
        let rows = sqlx::query_as::<_, PendingRow>(query)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PendingRow::into_pending).collect()
    }

    async fn try_start(
        &self,
        id: ResourceId,
        plan_id: ResourceId,
        org: &str,
        limit: i64,
    ) -> DbResult<bool> {
        // Single statement: the running count is re-checked in the WHERE
        // clause, so the limit holds even if the caller's view was stale.
        let query = r#"
            UPDATE builds SET status = 'running', started_at = NOW()
            WHERE id = $1
              AND status IN ('queued', 'waiting')
              AND (
                SELECT COUNT(*) FROM builds b
                JOIN plan_repositories pr ON pr.id = b.planrepo_id
                WHERE pr.plan_id = $2 AND b.org = $3 AND b.status = 'running'
              ) < $4
        "#;
        let result = sqlx::query(query)
            .bind(id.as_uuid())
            .bind(plan_id.as_uuid())
            .bind(org)
            .bind(limit)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_waiting(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE builds SET status = 'waiting' WHERE id = $1 AND status IN ('queued', 'waiting')")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue(&self, id: ResourceId) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET status = 'queued', started_at = NULL WHERE id = $1 AND status = 'running'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::InvalidTransition(format!(
                "build {} is not running",
                id
            )));
        }
        Ok(())
    }

    async fn mark_error(&self, id: ResourceId, message: &str) -> DbResult<()> {
        let query = format!(
            r#"
            UPDATE builds
            SET status = 'error', log = $2, finished_at = NOW()
            WHERE id = $1 AND status IN {NON_TERMINAL}
            "#
        );
        let result = sqlx::query(&query)
            .bind(id.as_uuid())
            .bind(message)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::InvalidTransition(format!(
                "build {} already finished",
                id
            )));
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: ResourceId,
        status: BuildStatus,
        log: Option<&str>,
    ) -> DbResult<Build> {
        if !BuildStatus::Running.can_transition_to(status) || !status.is_terminal() {
            return Err(DbError::InvalidTransition(format!(
                "running -> {} is not a terminal transition",
                status
            )));
        }
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = $2, log = COALESCE($3, log), finished_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(log)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row.try_into(),
            None => {
                // Distinguish a missing build from a bad transition.
                let current = self.get(id).await?;
                Err(DbError::InvalidTransition(format!(
                    "build {} is {}, not running",
                    id, current.status
                )))
            }
        }
    }

    async fn cancel(&self, id: ResourceId) -> DbResult<bool> {
        let query = format!(
            r#"
            UPDATE builds SET status = 'cancelled', finished_at = NOW()
            WHERE id = $1 AND status IN {NON_TERMINAL}
            "#
        );
        let result = sqlx::query(&query)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
