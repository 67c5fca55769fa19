//! Source repositories known to the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::error::Error;

/// A registered source repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: ResourceId,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// The `owner/name` identity carried by trigger events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepoIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name))
            }
            _ => Err(Error::InvalidInput(format!(
                "expected owner/name, got {:?}",
                s
            ))),
        }
    }
}
