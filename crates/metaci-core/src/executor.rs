//! Executor dispatch contract.
//!
//! Executors run admitted builds outside this subsystem. The scheduler only
//! hands work off and records the outcome of the handoff; it never waits for
//! the build itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ResourceId;

/// Work handed to an executor when a build is promoted to running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub build_id: ResourceId,
    pub plan_name: String,
    pub org: String,
    pub commit_sha: String,
    pub priority: i32,
}

/// How a dispatch failed.
///
/// A transient failure requeues the build for the next tick; a permanent
/// failure marks it errored and it is not retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

/// Trait for build executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Hand a promoted build to the execution backend.
    ///
    /// Returns as soon as the backend has accepted the work; completion is
    /// reported asynchronously through the build store.
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError>;
}
