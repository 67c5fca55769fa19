//! The scheduler pass.
//!
//! One invocation scans queued and waiting builds oldest-first, promotes
//! those whose concurrency scope has capacity, and hands them to the
//! executor. A build that cannot start this pass waits for the next tick.

use std::sync::Arc;

use metaci_core::executor::{DispatchError, DispatchRequest, Executor};
use metaci_core::plan::ConcurrencyScope;
use metaci_db::{BuildStore, PendingBuild};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Outcome counts for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub started: usize,
    pub waiting: usize,
    pub errored: usize,
}

impl std::fmt::Display for TickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.checked == 0 {
            write!(f, "no queued builds to check")
        } else {
            write!(f, "started {} of {} queued builds", self.started, self.checked)
        }
    }
}

enum Disposition {
    Started,
    Waiting,
    Requeued,
    Errored,
}

/// Promotes pending builds within their concurrency limits.
pub struct Scheduler {
    builds: Arc<dyn BuildStore>,
    executor: Arc<dyn Executor>,
}

impl Scheduler {
    pub fn new(builds: Arc<dyn BuildStore>, executor: Arc<dyn Executor>) -> Self {
        Self { builds, executor }
    }

    /// Run one scheduling pass.
    ///
    /// Per-build failures are logged and counted; they never abort the
    /// pass.
    pub async fn tick(&self) -> Result<TickSummary> {
        let pending = self.builds.list_pending().await?;
        let mut summary = TickSummary::default();

        for item in pending {
            summary.checked += 1;
            match self.schedule_one(&item).await {
                Ok(Disposition::Started) => summary.started += 1,
                Ok(Disposition::Waiting) => summary.waiting += 1,
                Ok(Disposition::Requeued) => {}
                Ok(Disposition::Errored) => summary.errored += 1,
                Err(e) => {
                    error!(build_id = %item.build.id, error = %e, "failed to schedule build");
                    summary.errored += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn schedule_one(&self, item: &PendingBuild) -> Result<Disposition> {
        let scope = ConcurrencyScope {
            plan_id: item.plan.id,
            org: item.build.org.clone(),
        };
        let started = self
            .builds
            .try_start(
                item.build.id,
                item.plan.id,
                &item.build.org,
                i64::from(item.plan.concurrency_limit),
            )
            .await?;
        if !started {
            self.builds.mark_waiting(item.build.id).await?;
            debug!(build_id = %item.build.id, %scope, "concurrency limit reached, waiting");
            return Ok(Disposition::Waiting);
        }

        let request = DispatchRequest {
            build_id: item.build.id,
            plan_name: item.plan.name.clone(),
            org: item.build.org.clone(),
            commit_sha: item.build.commit_sha.clone(),
            priority: item.build.priority,
        };
        match self.executor.dispatch(request).await {
            Ok(()) => {
                info!(build_id = %item.build.id, plan = %item.plan.name, "build started");
                Ok(Disposition::Started)
            }
            Err(DispatchError::Transient(msg)) => {
                warn!(build_id = %item.build.id, error = %msg, "transient dispatch failure, requeueing");
                self.builds.requeue(item.build.id).await?;
                Ok(Disposition::Requeued)
            }
            Err(DispatchError::Permanent(msg)) => {
                error!(build_id = %item.build.id, error = %msg, "permanent dispatch failure");
                self.builds.mark_error(item.build.id, &msg).await?;
                Ok(Disposition::Errored)
            }
        }
    }
}
