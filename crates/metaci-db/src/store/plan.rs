//! Plan and plan-repository binding store.

use async_trait::async_trait;
use metaci_core::ResourceId;
use metaci_core::plan::{Plan, PlanRepository};
use metaci_core::trigger::TriggerKind;
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Fields for creating a plan.
#[derive(Debug, Clone)]
pub struct NewPlan<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub trigger: TriggerKind,
    pub regex: Option<&'a str>,
    pub org: &'a str,
    pub priority: i32,
    pub concurrency_limit: i32,
    pub public: bool,
}

/// An active binding joined with its plan, the unit admission resolves
/// trigger events against.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub planrepo: PlanRepository,
    pub plan: Plan,
}

impl ResolvedBinding {
    /// Target org for builds admitted under this binding.
    pub fn org(&self) -> &str {
        self.planrepo.org.as_deref().unwrap_or(&self.plan.org)
    }
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create_plan(&self, plan: NewPlan<'_>) -> DbResult<Plan>;
    async fn get_plan_by_name(&self, name: &str) -> DbResult<Option<Plan>>;
    /// Bind a plan to a repository, optionally overriding the target org.
    async fn bind(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
        org: Option<&str>,
    ) -> DbResult<PlanRepository>;
    /// All active bindings for a repository whose plan is also active.
    async fn active_bindings_for_repo(&self, repo_id: ResourceId)
    -> DbResult<Vec<ResolvedBinding>>;
    /// The active binding for a specific (plan, repo) pair, if any.
    async fn binding_for_plan_repo(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
    ) -> DbResult<Option<ResolvedBinding>>;
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: uuid::Uuid,
    name: String,
    description: Option<String>,
    trigger: String,
    regex: Option<String>,
    org: String,
    priority: i32,
    concurrency_limit: i32,
    active: bool,
    public: bool,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DbError;

    fn try_from(row: PlanRow) -> DbResult<Plan> {
        let trigger: TriggerKind = row
            .trigger
            .parse()
            .map_err(|e| DbError::InvalidRecord(format!("plan {}: {}", row.id, e)))?;
        Ok(Plan {
            id: ResourceId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            trigger,
            regex: row.regex,
            org: row.org,
            priority: row.priority,
            concurrency_limit: row.concurrency_limit,
            active: row.active,
            public: row.public,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    planrepo_id: uuid::Uuid,
    org_override: Option<String>,
    planrepo_active: bool,
    #[sqlx(flatten)]
    plan: PlanRow,
    repo_id: uuid::Uuid,
}

impl TryFrom<BindingRow> for ResolvedBinding {
    type Error = DbError;

    fn try_from(row: BindingRow) -> DbResult<ResolvedBinding> {
        let plan_id = ResourceId::from_uuid(row.plan.id);
        Ok(ResolvedBinding {
            planrepo: PlanRepository {
                id: ResourceId::from_uuid(row.planrepo_id),
                plan_id,
                repo_id: ResourceId::from_uuid(row.repo_id),
                org: row.org_override,
                active: row.planrepo_active,
            },
            plan: row.plan.try_into()?,
        })
    }
}

const BINDING_COLUMNS: &str = r#"
    pr.id AS planrepo_id, pr.org AS org_override, pr.active AS planrepo_active,
    pr.repo_id AS repo_id,
    p.id, p.name, p.description, p.trigger, p.regex, p.org,
    p.priority, p.concurrency_limit, p.active, p.public
"#;

/// PostgreSQL implementation of PlanStore.
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_plan(&self, plan: NewPlan<'_>) -> DbResult<Plan> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            INSERT INTO plans
                (id, name, description, trigger, regex, org, priority,
                 concurrency_limit, active, public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, NOW(), NOW())
            RETURNING id, name, description, trigger, regex, org,
                      priority, concurrency_limit, active, public
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(plan.name)
        .bind(plan.description)
        .bind(plan.trigger.as_str())
        .bind(plan.regex)
        .bind(plan.org)
        .bind(plan.priority)
        .bind(plan.concurrency_limit)
        .bind(plan.public)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if DbError::is_unique_violation(&e) {
                DbError::Duplicate(format!("plan {}", plan.name))
            } else {
                e.into()
            }
        })?;
        row.try_into()
    }

    async fn get_plan_by_name(&self, name: &str) -> DbResult<Option<Plan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT id, name, description, trigger, regex, org,
                   priority, concurrency_limit, active, public
            FROM plans WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn bind(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
        org: Option<&str>,
    ) -> DbResult<PlanRepository> {
        let row = sqlx::query_as::<_, (uuid::Uuid, Option<String>, bool)>(
            r#"
            INSERT INTO plan_repositories (id, plan_id, repo_id, org, active, created_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            RETURNING id, org, active
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(plan_id.as_uuid())
        .bind(repo_id.as_uuid())
        .bind(org)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if DbError::is_unique_violation(&e) {
                DbError::Duplicate(format!("binding {} x {}", plan_id, repo_id))
            } else {
                e.into()
            }
        })?;
        Ok(PlanRepository {
            id: ResourceId::from_uuid(row.0),
            plan_id,
            repo_id,
            org: row.1,
            active: row.2,
        })
    }

    async fn active_bindings_for_repo(
        &self,
        repo_id: ResourceId,
    ) -> DbResult<Vec<ResolvedBinding>> {
        let query = format!(
            r#"
            SELECT {BINDING_COLUMNS}
            FROM plan_repositories pr
            JOIN plans p ON p.id = pr.plan_id
            WHERE pr.repo_id = $1 AND pr.active AND p.active
            ORDER BY p.name
            "#
        );
        let rows = sqlx::query_as::<_, BindingRow>(&query)
            .bind(repo_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn binding_for_plan_repo(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
    ) -> DbResult<Option<ResolvedBinding>> {
        let query = format!(
            r#"
            SELECT {BINDING_COLUMNS}
            FROM plan_repositories pr
            JOIN plans p ON p.id = pr.plan_id
            WHERE pr.plan_id = $1 AND pr.repo_id = $2 AND pr.active AND p.active
            "#
        );
        let row = sqlx::query_as::<_, BindingRow>(&query)
            .bind(plan_id.as_uuid())
            .bind(repo_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }
}
