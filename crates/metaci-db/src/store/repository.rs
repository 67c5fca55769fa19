//! Repository registry store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaci_core::ResourceId;
use metaci_core::repository::Repository;
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn create(&self, owner: &str, name: &str, url: &str) -> DbResult<Repository>;
    async fn get_by_identity(&self, owner: &str, name: &str) -> DbResult<Option<Repository>>;
    async fn list(&self) -> DbResult<Vec<Repository>>;
}

#[derive(Debug, sqlx::FromRow)]
struct RepositoryRow {
    id: uuid::Uuid,
    owner: String,
    name: String,
    url: String,
    created_at: DateTime<Utc>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            id: ResourceId::from_uuid(row.id),
            owner: row.owner,
            name: row.name,
            url: row.url,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of RepositoryStore.
pub struct PgRepositoryStore {
    pool: PgPool,
}

impl PgRepositoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for PgRepositoryStore {
    async fn create(&self, owner: &str, name: &str, url: &str) -> DbResult<Repository> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            INSERT INTO repositories (id, owner, name, url, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(owner)
        .bind(name)
        .bind(url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if DbError::is_unique_violation(&e) {
                DbError::Duplicate(format!("repository {}/{}", owner, name))
            } else {
                e.into()
            }
        })?;
        Ok(row.into())
    }

    async fn get_by_identity(&self, owner: &str, name: &str) -> DbResult<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            "SELECT * FROM repositories WHERE owner = $1 AND name = $2",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> DbResult<Vec<Repository>> {
        let rows =
            sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories ORDER BY owner, name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
