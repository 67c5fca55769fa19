//! Admission controller: converts trigger events into build records.

use std::sync::Arc;

use metaci_core::build::Build;
use metaci_core::repository::RepoIdentity;
use metaci_core::trigger::TriggerEvent;
use metaci_db::{BuildStore, NewBuild, PlanStore, RepositoryStore, ResolvedBinding};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};

/// A build produced by admission, with the plan it was admitted under and
/// whether this call created it or reused an existing non-terminal build.
#[derive(Debug, Clone)]
pub struct AdmittedBuild {
    pub build: Build,
    pub plan_name: String,
    pub created: bool,
}

/// Decides which trigger events become builds.
pub struct AdmissionController {
    repos: Arc<dyn RepositoryStore>,
    plans: Arc<dyn PlanStore>,
    builds: Arc<dyn BuildStore>,
}

impl AdmissionController {
    pub fn new(
        repos: Arc<dyn RepositoryStore>,
        plans: Arc<dyn PlanStore>,
        builds: Arc<dyn BuildStore>,
    ) -> Self {
        Self {
            repos,
            plans,
            builds,
        }
    }

    /// Admit builds for a trigger event.
    ///
    /// Every matching binding admits one build (fan-out). An event matching
    /// no plan returns an empty list; that is a normal outcome, not an
    /// error.
    pub async fn admit(&self, event: &TriggerEvent) -> Result<Vec<AdmittedBuild>> {
        if event.is_skippable() {
            debug!(repo = %event.repo, commit = %event.commit_sha, "skippable event, nothing to admit");
            return Ok(Vec::new());
        }

        let repo = self
            .repos
            .get_by_identity(&event.repo.owner, &event.repo.name)
            .await?
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!("unknown repository {}", event.repo))
            })?;

        let bindings = self.plans.active_bindings_for_repo(repo.id).await?;
        let mut admitted = Vec::new();
        for binding in bindings {
            let matched = binding
                .plan
                .matches(event)
                .map_err(|e| SchedulerError::BindingResolution(e.to_string()))?;
            if !matched {
                continue;
            }
            admitted.push(
                self.admit_binding(
                    &binding,
                    &event.branch,
                    &event.commit_sha,
                    event.commit_message.as_deref(),
                )
                .await?,
            );
        }

        if admitted.is_empty() {
            debug!(repo = %event.repo, branch = %event.branch, "no matching plan");
        }
        Ok(admitted)
    }

    /// Admit a build for an explicitly named plan, skipping regex
    /// resolution. Used for manual and scheduled plans.
    pub async fn admit_manual(
        &self,
        plan_name: &str,
        repo: &RepoIdentity,
        branch: &str,
        commit_sha: &str,
    ) -> Result<AdmittedBuild> {
        let repo_row = self
            .repos
            .get_by_identity(&repo.owner, &repo.name)
            .await?
            .ok_or_else(|| SchedulerError::InvalidTrigger(format!("unknown repository {}", repo)))?;
        let plan = self
            .plans
            .get_plan_by_name(plan_name)
            .await?
            .ok_or_else(|| SchedulerError::InvalidTrigger(format!("unknown plan {}", plan_name)))?;
        let binding = self
            .plans
            .binding_for_plan_repo(plan.id, repo_row.id)
            .await?
            .ok_or_else(|| {
                SchedulerError::BindingResolution(format!(
                    "plan {} is not bound to {}",
                    plan_name, repo
                ))
            })?;
        self.admit_binding(&binding, branch, commit_sha, None).await
    }

    async fn admit_binding(
        &self,
        binding: &ResolvedBinding,
        branch: &str,
        commit_sha: &str,
        commit_message: Option<&str>,
    ) -> Result<AdmittedBuild> {
        let admitted = self
            .builds
            .admit(NewBuild {
                planrepo_id: binding.planrepo.id,
                branch,
                commit_sha,
                commit_message,
                org: binding.org(),
                priority: binding.plan.priority,
            })
            .await?;
        if admitted.created {
            info!(
                build_id = %admitted.build.id,
                plan = %binding.plan.name,
                branch,
                commit = commit_sha,
                "build queued"
            );
        } else {
            debug!(
                build_id = %admitted.build.id,
                plan = %binding.plan.name,
                "reusing existing build for commit"
            );
        }
        Ok(AdmittedBuild {
            build: admitted.build,
            plan_name: binding.plan.name.clone(),
            created: admitted.created,
        })
    }
}
