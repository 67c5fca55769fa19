//! Scheduler error types.

use metaci_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The trigger event could not be tied to a known repository.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Binding resolution failed for a reason other than "no match".
    #[error("binding resolution failed: {0}")]
    BindingResolution(String),

    /// A registered job row cannot be interpreted.
    #[error("invalid job definition: {0}")]
    InvalidJob(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
