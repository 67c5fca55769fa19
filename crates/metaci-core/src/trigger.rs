//! Trigger events feeding the admission controller.

use serde::{Deserialize, Serialize};

use crate::repository::RepoIdentity;

/// The all-zero SHA a push event carries when a branch is deleted.
pub const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// What caused a trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Commit,
    Tag,
    Schedule,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Commit => "commit",
            TriggerKind::Tag => "tag",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(TriggerKind::Commit),
            "tag" => Ok(TriggerKind::Tag),
            "schedule" => Ok(TriggerKind::Schedule),
            "manual" => Ok(TriggerKind::Manual),
            _ => Err(crate::Error::InvalidInput(format!(
                "unknown trigger kind: {}",
                s
            ))),
        }
    }
}

/// An incoming event that may cause builds to be admitted.
///
/// For tag triggers `branch` carries the tag name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub repo: RepoIdentity,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub kind: TriggerKind,
}

impl TriggerEvent {
    /// Events that admit nothing: branch deletions (all-zero SHA) and
    /// commits whose message asks to be skipped.
    pub fn is_skippable(&self) -> bool {
        if self.commit_sha == NULL_SHA {
            return true;
        }
        self.commit_message
            .as_deref()
            .is_some_and(|msg| msg.contains("[ci skip]"))
    }
}
