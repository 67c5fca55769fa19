//! Build admission and scheduling for MetaCI.
//!
//! Decides which trigger events become builds, deduplicates concurrent
//! admission attempts, and promotes queued builds within per-scope
//! concurrency limits on a periodic tick.

pub mod admission;
pub mod error;
pub mod queue;
pub mod registrar;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testutil;

pub use admission::{AdmissionController, AdmittedBuild};
pub use error::SchedulerError;
pub use queue::{BuildQueue, QueuedBuild};
pub use registrar::{IntervalUnit, JobCallable, Registered, Registrar};
pub use scheduler::{Scheduler, TickSummary};
pub use service::SchedulerService;
