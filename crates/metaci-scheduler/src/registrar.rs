//! Idempotent registration of the periodic scheduler job.
//!
//! Exactly one enabled RepeatableJob drives the scheduler system-wide;
//! every process replica may call `ensure_registered` at bootstrap without
//! creating duplicates.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metaci_db::{DbError, NewRepeatableJob, RepeatableJob, ScheduledJobStore};
use tracing::info;

use crate::error::{Result, SchedulerError};

/// Name of the scheduler's own repeatable job.
pub const CHECK_WAITING_BUILDS: &str = "check_waiting_builds";
/// Queue the scheduler job runs on.
pub const SCHEDULER_QUEUE: &str = "short";
/// Default tick interval.
pub const DEFAULT_INTERVAL: i32 = 1;

/// Units a job interval can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minutes,
    Hours,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
        }
    }

    pub fn duration(&self, count: i32) -> Duration {
        let count = count.max(1) as u64;
        match self {
            IntervalUnit::Minutes => Duration::from_secs(count * 60),
            IntervalUnit::Hours => Duration::from_secs(count * 3600),
        }
    }
}

impl std::str::FromStr for IntervalUnit {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "minutes" => Ok(IntervalUnit::Minutes),
            "hours" => Ok(IntervalUnit::Hours),
            _ => Err(SchedulerError::InvalidJob(format!(
                "unknown interval unit: {}",
                s
            ))),
        }
    }
}

/// The statically bound callables a RepeatableJob row may reference.
///
/// Job rows store a callable string; it is resolved through this enum once
/// at startup, never dispatched dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCallable {
    CheckWaitingBuilds,
}

impl JobCallable {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCallable::CheckWaitingBuilds => "metaci_scheduler::check_waiting_builds",
        }
    }
}

impl std::str::FromStr for JobCallable {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "metaci_scheduler::check_waiting_builds" => Ok(JobCallable::CheckWaitingBuilds),
            _ => Err(SchedulerError::InvalidJob(format!(
                "unknown job callable: {}",
                s
            ))),
        }
    }
}

/// Result of `ensure_registered`.
#[derive(Debug, Clone)]
pub struct Registered {
    pub job: RepeatableJob,
    pub created: bool,
}

/// Registers repeatable jobs exactly once.
pub struct Registrar {
    jobs: Arc<dyn ScheduledJobStore>,
}

impl Registrar {
    pub fn new(jobs: Arc<dyn ScheduledJobStore>) -> Self {
        Self { jobs }
    }

    /// Look up or create the enabled job for (name, callable).
    ///
    /// Safe to call from every replica: a lost creation race falls back to
    /// the row the winner created.
    pub async fn ensure_registered(
        &self,
        name: &str,
        callable: JobCallable,
        interval: i32,
        unit: IntervalUnit,
        queue: &str,
    ) -> Result<Registered> {
        if let Some(job) = self.jobs.find_enabled(name, callable.as_str()).await? {
            return Ok(Registered {
                job,
                created: false,
            });
        }

        let new = NewRepeatableJob {
            name,
            callable: callable.as_str(),
            interval,
            interval_unit: unit.as_str(),
            queue,
        };
        match self.jobs.create(new, Utc::now()).await {
            Ok(job) => {
                info!(job_id = %job.id, name, "created repeatable job");
                Ok(Registered { job, created: true })
            }
            Err(DbError::Duplicate(_)) => {
                let job = self
                    .jobs
                    .find_enabled(name, callable.as_str())
                    .await?
                    .ok_or_else(|| {
                        SchedulerError::Store(DbError::NotFound(format!("repeatable job {}", name)))
                    })?;
                Ok(Registered {
                    job,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register the scheduler tick with its defaults.
    pub async fn ensure_scheduler_job(&self) -> Result<Registered> {
        self.ensure_registered(
            CHECK_WAITING_BUILDS,
            JobCallable::CheckWaitingBuilds,
            DEFAULT_INTERVAL,
            IntervalUnit::Minutes,
            SCHEDULER_QUEUE,
        )
        .await
    }
}
