//! Store traits and their PostgreSQL implementations.

pub mod build;
pub mod plan;
pub mod repository;
pub mod scheduled_job;

pub use build::{Admitted, BuildStore, NewBuild, PendingBuild, PgBuildStore};
pub use plan::{NewPlan, PgPlanStore, PlanStore, ResolvedBinding};
pub use repository::{PgRepositoryStore, RepositoryStore};
pub use scheduled_job::{
    NewRepeatableJob, PgScheduledJobStore, RepeatableJob, ScheduledJobStore,
};
