//! Periodic driver for the scheduler tick.
//!
//! The interval comes from the registered RepeatableJob row; an advisory
//! lock makes overlapping invocations skip instead of running concurrently.

use std::sync::Arc;

use metaci_db::lock::{AdvisoryLock, SCHEDULER_LOCK_KEY};
use metaci_db::{DbError, ScheduledJobStore};
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::registrar::{CHECK_WAITING_BUILDS, IntervalUnit, JobCallable};
use crate::scheduler::Scheduler;

/// Runs the scheduler tick on the registered interval.
pub struct SchedulerService {
    pool: PgPool,
    scheduler: Scheduler,
    jobs: Arc<dyn ScheduledJobStore>,
}

impl SchedulerService {
    pub fn new(pool: PgPool, scheduler: Scheduler, jobs: Arc<dyn ScheduledJobStore>) -> Self {
        Self {
            pool,
            scheduler,
            jobs,
        }
    }

    /// Resolve the registered job and tick until the process stops.
    pub async fn run(&self) -> Result<()> {
        let job = self
            .jobs
            .find_enabled(
                CHECK_WAITING_BUILDS,
                JobCallable::CheckWaitingBuilds.as_str(),
            )
            .await?
            .ok_or_else(|| {
                SchedulerError::Store(DbError::NotFound(
                    "repeatable job check_waiting_builds; run ensure-scheduled-job first"
                        .to_string(),
                ))
            })?;

        // Resolve the callable once at startup; an unknown string in the
        // row is a configuration error, not something to dispatch around.
        let callable: JobCallable = job.callable.parse()?;
        debug_assert_eq!(callable, JobCallable::CheckWaitingBuilds);
        let unit: IntervalUnit = job.interval_unit.parse()?;
        let period = unit.duration(job.interval);
        info!(job_id = %job.id, ?period, "starting scheduler");

        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            self.run_once().await;
        }
    }

    /// One guarded tick. Skips when another scheduler holds the lock.
    pub async fn run_once(&self) {
        match AdvisoryLock::try_acquire(&self.pool, SCHEDULER_LOCK_KEY).await {
            Ok(Some(lock)) => {
                match self.scheduler.tick().await {
                    Ok(summary) => info!(%summary, "scheduler tick complete"),
                    Err(e) => error!(error = %e, "scheduler tick failed"),
                }
                if let Err(e) = lock.release().await {
                    warn!(error = %e, "failed to release scheduler lock");
                }
            }
            Ok(None) => debug!("scheduler lock held elsewhere, skipping tick"),
            Err(e) => warn!(error = %e, "could not acquire scheduler lock"),
        }
    }
}
