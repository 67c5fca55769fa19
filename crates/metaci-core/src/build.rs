//! Build records and the build state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::error::{Error, Result};

/// Lifecycle state of a build.
///
/// `Queued` is the initial state set at admission. `Waiting` means the build
/// is blocked by a concurrency limit. All four terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Waiting,
    Running,
    Success,
    Failed,
    Error,
    Cancelled,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Waiting => "waiting",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Error => "error",
            BuildStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Error | BuildStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// `Running -> Queued` is the one backward edge: a build whose dispatch
    /// failed transiently is requeued and re-evaluated on the next tick.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match self {
            BuildStatus::Queued => matches!(
                next,
                BuildStatus::Waiting
                    | BuildStatus::Running
                    | BuildStatus::Error
                    | BuildStatus::Cancelled
            ),
            BuildStatus::Waiting => matches!(
                next,
                BuildStatus::Running | BuildStatus::Error | BuildStatus::Cancelled
            ),
            BuildStatus::Running => matches!(
                next,
                BuildStatus::Queued
                    | BuildStatus::Success
                    | BuildStatus::Failed
                    | BuildStatus::Error
                    | BuildStatus::Cancelled
            ),
            _ => false,
        }
    }

    /// Validate a transition, returning the new state.
    pub fn transition_to(&self, next: BuildStatus) -> Result<BuildStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(BuildStatus::Queued),
            "waiting" => Ok(BuildStatus::Waiting),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            "error" => Ok(BuildStatus::Error),
            "cancelled" => Ok(BuildStatus::Cancelled),
            _ => Err(Error::InvalidInput(format!("unknown build status: {}", s))),
        }
    }
}

/// A build admitted into the system.
///
/// `planrepo_id` is resolved at admission and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: ResourceId,
    /// The plan-repository binding this build was admitted under.
    pub planrepo_id: ResourceId,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    /// Target org resolved from the binding at admission time.
    pub org: String,
    pub priority: i32,
    pub status: BuildStatus,
    pub log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
