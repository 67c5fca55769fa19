//! Build inspection commands.

use anyhow::Result;
use metaci_core::ResourceId;
use metaci_db::{BuildStore, PgBuildStore};
use sqlx::PgPool;

pub async fn list(pool: &PgPool, limit: i64) -> Result<()> {
    let store = PgBuildStore::new(pool.clone());
    let builds = store.list_recent(limit).await?;
    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }
    for build in builds {
        let sha = build.commit_sha.get(..7).unwrap_or(&build.commit_sha);
        println!(
            "{}  {:<9} {:<30} {:<8} {}",
            build.id,
            build.status.as_str(),
            build.branch,
            sha,
            build.org
        );
    }
    Ok(())
}

pub async fn show(pool: &PgPool, id: &str) -> Result<()> {
    let id: ResourceId = id.parse()?;
    let store = PgBuildStore::new(pool.clone());
    let build = store.get(id).await?;
    println!("{}", serde_json::to_string_pretty(&build)?);
    Ok(())
}

pub async fn cancel(pool: &PgPool, id: &str) -> Result<()> {
    let id: ResourceId = id.parse()?;
    let store = PgBuildStore::new(pool.clone());
    if store.cancel(id).await? {
        println!("Cancelled build {}", id);
    } else {
        println!("Build {} already finished", id);
    }
    Ok(())
}
