//! CLI command implementations.

pub mod builds;
pub mod work;

use std::sync::Arc;

use anyhow::Result;
use metaci_core::repository::RepoIdentity;
use metaci_core::trigger::{TriggerEvent, TriggerKind};
use metaci_db::lock::{AdvisoryLock, SCHEDULER_LOCK_KEY};
use metaci_db::{PgBuildStore, PgPlanStore, PgRepositoryStore, PgScheduledJobStore};
use metaci_scheduler::{AdmissionController, BuildQueue, Registrar, Scheduler, SchedulerService};
use sqlx::PgPool;

pub async fn migrate(pool: &PgPool) -> Result<()> {
    metaci_db::run_migrations(pool).await?;
    println!("Migrations applied");
    Ok(())
}

pub async fn ensure_scheduled_job(pool: &PgPool) -> Result<()> {
    let registrar = Registrar::new(Arc::new(PgScheduledJobStore::new(pool.clone())));
    let registered = registrar.ensure_scheduler_job().await?;
    if registered.created {
        println!(
            "Created job check_waiting_builds with id {}",
            registered.job.id
        );
    } else {
        println!(
            "Scheduled job check_waiting_builds with id {} already exists and is {}.",
            registered.job.id,
            if registered.job.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
    Ok(())
}

pub async fn trigger(
    pool: &PgPool,
    repo: &str,
    branch: &str,
    commit: &str,
    kind: &str,
    message: Option<String>,
    plan: Option<String>,
) -> Result<()> {
    let identity: RepoIdentity = repo.parse()?;
    let admission = admission_controller(pool);

    if let Some(plan) = plan {
        let admitted = admission
            .admit_manual(&plan, &identity, branch, commit)
            .await?;
        println!(
            "{} build {} for plan {}",
            if admitted.created { "Queued" } else { "Reusing" },
            admitted.build.id,
            admitted.plan_name
        );
        return Ok(());
    }

    let kind: TriggerKind = kind.parse()?;
    let event = TriggerEvent {
        repo: identity,
        branch: branch.to_string(),
        commit_sha: commit.to_string(),
        commit_message: message,
        kind,
    };
    let admitted = admission.admit(&event).await?;
    if admitted.is_empty() {
        println!("No matching plan");
    }
    for entry in admitted {
        println!(
            "{} build {} for plan {}",
            if entry.created { "Queued" } else { "Reusing" },
            entry.build.id,
            entry.plan_name
        );
    }
    Ok(())
}

pub async fn tick(pool: &PgPool) -> Result<()> {
    let Some(lock) = AdvisoryLock::try_acquire(pool, SCHEDULER_LOCK_KEY).await? else {
        println!("Another scheduler is running; skipping");
        return Ok(());
    };
    let result = scheduler(pool).tick().await;
    lock.release().await?;
    println!("{}", result?);
    Ok(())
}

pub async fn run_scheduler(pool: &PgPool) -> Result<()> {
    let service = SchedulerService::new(
        pool.clone(),
        scheduler(pool),
        Arc::new(PgScheduledJobStore::new(pool.clone())),
    );
    service.run().await?;
    Ok(())
}

fn admission_controller(pool: &PgPool) -> AdmissionController {
    AdmissionController::new(
        Arc::new(PgRepositoryStore::new(pool.clone())),
        Arc::new(PgPlanStore::new(pool.clone())),
        Arc::new(PgBuildStore::new(pool.clone())),
    )
}

fn scheduler(pool: &PgPool) -> Scheduler {
    Scheduler::new(
        Arc::new(PgBuildStore::new(pool.clone())),
        Arc::new(BuildQueue::new(pool.clone())),
    )
}
