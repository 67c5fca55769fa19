//! Plans and plan-repository bindings.
//!
//! A plan is a named pipeline definition with a trigger kind, a branch-match
//! regex, and a target org. Binding a plan to a repository produces a
//! `PlanRepository`, the unit a build references.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::error::{Error, Result};
use crate::trigger::{TriggerEvent, TriggerKind};

/// A build plan definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: ResourceId,
    pub name: String,
    pub description: Option<String>,
    pub trigger: TriggerKind,
    /// Branch-match regex for commit/tag triggers. Anchors are implied.
    pub regex: Option<String>,
    /// Default target org; a binding may override it per repository.
    pub org: String,
    pub priority: i32,
    /// Max simultaneous running builds per concurrency scope.
    pub concurrency_limit: i32,
    pub active: bool,
    pub public: bool,
}

impl Plan {
    pub fn matches(&self, event: &TriggerEvent) -> Result<bool> {
        matches_event(self.trigger, self.regex.as_deref(), event)
    }
}

/// Binding of a plan to a repository, with per-repo overrides.
///
/// At most one active binding exists per (plan, repo) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRepository {
    pub id: ResourceId,
    pub plan_id: ResourceId,
    pub repo_id: ResourceId,
    /// Overrides the plan's target org for this repository.
    pub org: Option<String>,
    pub active: bool,
}

/// The grouping within which a running-build limit is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyScope {
    pub plan_id: ResourceId,
    pub org: String,
}

impl std::fmt::Display for ConcurrencyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.plan_id, self.org)
    }
}

/// Whether a plan with the given trigger kind and regex matches an event.
///
/// Commit and tag triggers match when the kinds agree and the regex matches
/// the full ref name. Scheduled and manual plans are selected explicitly,
/// never by event resolution.
pub fn matches_event(
    trigger: TriggerKind,
    regex: Option<&str>,
    event: &TriggerEvent,
) -> Result<bool> {
    if trigger != event.kind {
        return Ok(false);
    }
    match trigger {
        TriggerKind::Commit | TriggerKind::Tag => {
            let Some(pattern) = regex else {
                return Ok(false);
            };
            let re = compile_anchored(pattern)?;
            Ok(re.is_match(&event.branch))
        }
        TriggerKind::Schedule | TriggerKind::Manual => Ok(false),
    }
}

/// Compile a branch-match pattern as a full-string match.
pub fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| Error::BindingResolution(format!("invalid regex {:?}: {}", pattern, e)))
}
