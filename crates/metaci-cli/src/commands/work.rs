//! Runner surface: claim dispatched builds and report results.

use anyhow::Result;
use metaci_core::ResourceId;
use metaci_core::build::BuildStatus;
use metaci_db::{BuildStore, PgBuildStore};
use metaci_scheduler::BuildQueue;
use sqlx::PgPool;

pub async fn claim(pool: &PgPool, worker_id: &str) -> Result<()> {
    let queue = BuildQueue::new(pool.clone());
    match queue.claim(worker_id).await? {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => println!("No pending builds"),
    }
    Ok(())
}

pub async fn complete(
    pool: &PgPool,
    entry: &str,
    build: &str,
    status: &str,
    log: Option<String>,
) -> Result<()> {
    let entry_id: uuid::Uuid = entry.parse()?;
    let build_id: ResourceId = build.parse()?;
    let status: BuildStatus = status.parse()?;

    let store = PgBuildStore::new(pool.clone());
    let queue = BuildQueue::new(pool.clone());

    let build = store.finish(build_id, status, log.as_deref()).await?;
    if status == BuildStatus::Success {
        queue.complete(entry_id).await?;
    } else {
        queue.fail(entry_id, status.as_str()).await?;
    }
    println!("Build {} finished with status {}", build.id, build.status);
    Ok(())
}

pub async fn release(pool: &PgPool, entry: &str) -> Result<()> {
    let entry_id: uuid::Uuid = entry.parse()?;
    let queue = BuildQueue::new(pool.clone());
    queue.release(entry_id).await?;
    println!("Released entry {}", entry_id);
    Ok(())
}
