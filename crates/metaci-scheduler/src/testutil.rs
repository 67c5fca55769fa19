//! In-memory stores and a scriptable executor for scheduler tests.
//!
//! The store keeps everything behind one mutex, which gives it the same
//! atomicity the PostgreSQL statements provide.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use metaci_core::ResourceId;
use metaci_core::build::{Build, BuildStatus};
use metaci_core::executor::{DispatchError, DispatchRequest, Executor};
use metaci_core::plan::{ConcurrencyScope, Plan, PlanRepository};
use metaci_core::repository::{RepoIdentity, Repository};
use metaci_core::trigger::{TriggerEvent, TriggerKind};
use metaci_db::{
    Admitted, BuildStore, DbError, DbResult, NewBuild, NewPlan, NewRepeatableJob, PendingBuild,
    PlanStore, RepeatableJob, RepositoryStore, ResolvedBinding, ScheduledJobStore,
};

use crate::admission::AdmissionController;
use crate::scheduler::Scheduler;

pub fn commit_event(repo: &str, branch: &str, sha: &str) -> TriggerEvent {
    TriggerEvent {
        repo: repo.parse().unwrap(),
        branch: branch.to_string(),
        commit_sha: sha.to_string(),
        commit_message: None,
        kind: TriggerKind::Commit,
    }
}

#[derive(Default)]
struct Inner {
    repos: Vec<Repository>,
    plans: Vec<Plan>,
    bindings: Vec<PlanRepository>,
    builds: Vec<Build>,
    jobs: Vec<RepeatableJob>,
    seq: i64,
}

impl Inner {
    fn next_time(&mut self) -> DateTime<Utc> {
        self.seq += 1;
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(self.seq)
    }

    fn plan_id_of(&self, build: &Build) -> ResourceId {
        self.bindings
            .iter()
            .find(|pr| pr.id == build.planrepo_id)
            .map(|pr| pr.plan_id)
            .expect("build references a known binding")
    }

    fn running_in_scope(&self, scope: &ConcurrencyScope) -> i64 {
        self.builds
            .iter()
            .filter(|b| {
                b.status == BuildStatus::Running
                    && ConcurrencyScope {
                        plan_id: self.plan_id_of(b),
                        org: b.org.clone(),
                    } == *scope
            })
            .count() as i64
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn build_count(&self) -> usize {
        self.lock().builds.len()
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn count_with_status(&self, status: BuildStatus) -> usize {
        self.lock()
            .builds
            .iter()
            .filter(|b| b.status == status)
            .count()
    }

    pub fn status_of(&self, id: ResourceId) -> BuildStatus {
        self.lock()
            .builds
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.status)
            .expect("known build")
    }

    /// Test backdoor: set a status without transition checks.
    pub fn force_status(&self, id: ResourceId, status: BuildStatus) {
        let mut inner = self.lock();
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .expect("known build");
        build.status = status;
    }

    /// Record a terminal state the way an executor report would.
    pub fn complete(&self, id: ResourceId, status: BuildStatus) {
        assert!(status.is_terminal());
        let mut inner = self.lock();
        let now = inner.next_time();
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .expect("known build");
        build.status = build.status.transition_to(status).unwrap();
        build.finished_at = Some(now);
    }

    /// Attempt a transition back to running; errors for terminal builds.
    pub fn try_force_running(&self, id: ResourceId) -> metaci_core::Result<()> {
        let status = self.status_of(id);
        status.transition_to(BuildStatus::Running).map(|_| ())
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn create(&self, owner: &str, name: &str, url: &str) -> DbResult<Repository> {
        let mut inner = self.lock();
        if inner
            .repos
            .iter()
            .any(|r| r.owner == owner && r.name == name)
        {
            return Err(DbError::Duplicate(format!("repository {}/{}", owner, name)));
        }
        let created_at = inner.next_time();
        let repo = Repository {
            id: ResourceId::new(),
            owner: owner.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            created_at,
        };
        inner.repos.push(repo.clone());
        Ok(repo)
    }

    async fn get_by_identity(&self, owner: &str, name: &str) -> DbResult<Option<Repository>> {
        Ok(self
            .lock()
            .repos
            .iter()
            .find(|r| r.owner == owner && r.name == name)
            .cloned())
    }

    async fn list(&self) -> DbResult<Vec<Repository>> {
        Ok(self.lock().repos.clone())
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn create_plan(&self, plan: NewPlan<'_>) -> DbResult<Plan> {
        let mut inner = self.lock();
        if inner.plans.iter().any(|p| p.name == plan.name) {
            return Err(DbError::Duplicate(format!("plan {}", plan.name)));
        }
        let created = Plan {
            id: ResourceId::new(),
            name: plan.name.to_string(),
            description: plan.description.map(String::from),
            trigger: plan.trigger,
            regex: plan.regex.map(String::from),
            org: plan.org.to_string(),
            priority: plan.priority,
            concurrency_limit: plan.concurrency_limit,
            active: true,
            public: plan.public,
        };
        inner.plans.push(created.clone());
        Ok(created)
    }

    async fn get_plan_by_name(&self, name: &str) -> DbResult<Option<Plan>> {
        Ok(self.lock().plans.iter().find(|p| p.name == name).cloned())
    }

    async fn bind(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
        org: Option<&str>,
    ) -> DbResult<PlanRepository> {
        let mut inner = self.lock();
        if inner
            .bindings
            .iter()
            .any(|pr| pr.plan_id == plan_id && pr.repo_id == repo_id)
        {
            return Err(DbError::Duplicate(format!(
                "binding {} x {}",
                plan_id, repo_id
            )));
        }
        let binding = PlanRepository {
            id: ResourceId::new(),
            plan_id,
            repo_id,
            org: org.map(String::from),
            active: true,
        };
        inner.bindings.push(binding.clone());
        Ok(binding)
    }

    async fn active_bindings_for_repo(
        &self,
        repo_id: ResourceId,
    ) -> DbResult<Vec<ResolvedBinding>> {
        let inner = self.lock();
        Ok(inner
            .bindings
            .iter()
            .filter(|pr| pr.repo_id == repo_id && pr.active)
            .filter_map(|pr| {
                inner
                    .plans
                    .iter()
                    .find(|p| p.id == pr.plan_id && p.active)
                    .map(|p| ResolvedBinding {
                        planrepo: pr.clone(),
                        plan: p.clone(),
                    })
            })
            .collect())
    }

    async fn binding_for_plan_repo(
        &self,
        plan_id: ResourceId,
        repo_id: ResourceId,
    ) -> DbResult<Option<ResolvedBinding>> {
        let inner = self.lock();
        Ok(inner
            .bindings
            .iter()
            .find(|pr| pr.plan_id == plan_id && pr.repo_id == repo_id && pr.active)
            .and_then(|pr| {
                inner
                    .plans
                    .iter()
                    .find(|p| p.id == pr.plan_id && p.active)
                    .map(|p| ResolvedBinding {
                        planrepo: pr.clone(),
                        plan: p.clone(),
                    })
            }))
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn admit(&self, new: NewBuild<'_>) -> DbResult<Admitted> {
        let mut inner = self.lock();
        if let Some(existing) = inner.builds.iter().find(|b| {
            b.planrepo_id == new.planrepo_id
                && b.commit_sha == new.commit_sha
                && !b.status.is_terminal()
        }) {
            return Ok(Admitted {
                build: existing.clone(),
                created: false,
            });
        }
        let created_at = inner.next_time();
        let build = Build {
            id: ResourceId::new(),
            planrepo_id: new.planrepo_id,
            branch: new.branch.to_string(),
            commit_sha: new.commit_sha.to_string(),
            commit_message: new.commit_message.map(String::from),
            org: new.org.to_string(),
            priority: new.priority,
            status: BuildStatus::Queued,
            log: None,
            created_at,
            started_at: None,
            finished_at: None,
        };
        inner.builds.push(build.clone());
        Ok(Admitted {
            build,
            created: true,
        })
    }

    async fn get(&self, id: ResourceId) -> DbResult<Build> {
        self.lock()
            .builds
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn list_recent(&self, limit: i64) -> DbResult<Vec<Build>> {
        let mut builds = self.lock().builds.clone();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        builds.truncate(limit as usize);
        Ok(builds)
    }

    async fn list_pending(&self) -> DbResult<Vec<PendingBuild>> {
        let inner = self.lock();
        let mut pending: Vec<PendingBuild> = inner
            .builds
            .iter()
            .filter(|b| matches!(b.status, BuildStatus::Queued | BuildStatus::Waiting))
            .map(|b| {
                let plan_id = inner.plan_id_of(b);
                let plan = inner
                    .plans
                    .iter()
                    .find(|p| p.id == plan_id)
                    .expect("binding references a known plan");
                PendingBuild {
                    build: b.clone(),
                    plan: plan.clone(),
                }
            })
            .collect();
        pending.sort_by(|a, b| {
            b.build
                .priority
                .cmp(&a.build.priority)
                .then(a.build.created_at.cmp(&b.build.created_at))
        });
        Ok(pending)
    }

    async fn try_start(
        &self,
        id: ResourceId,
        plan_id: ResourceId,
        org: &str,
        limit: i64,
    ) -> DbResult<bool> {
        let mut inner = self.lock();
        let scope = ConcurrencyScope {
            plan_id,
            org: org.to_string(),
        };
        if inner.running_in_scope(&scope) >= limit {
            return Ok(false);
        }
        let now = inner.next_time();
        let Some(build) = inner.builds.iter_mut().find(|b| b.id == id) else {
            return Ok(false);
        };
        if !matches!(build.status, BuildStatus::Queued | BuildStatus::Waiting) {
            return Ok(false);
        }
        build.status = BuildStatus::Running;
        build.started_at = Some(now);
        Ok(true)
    }

    async fn mark_waiting(&self, id: ResourceId) -> DbResult<()> {
        let mut inner = self.lock();
        if let Some(build) = inner.builds.iter_mut().find(|b| b.id == id) {
            if matches!(build.status, BuildStatus::Queued | BuildStatus::Waiting) {
                build.status = BuildStatus::Waiting;
            }
        }
        Ok(())
    }

    async fn requeue(&self, id: ResourceId) -> DbResult<()> {
        let mut inner = self.lock();
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        if build.status != BuildStatus::Running {
            return Err(DbError::InvalidTransition(format!(
                "build {} is not running",
                id
            )));
        }
        build.status = BuildStatus::Queued;
        build.started_at = None;
        Ok(())
    }

    async fn mark_error(&self, id: ResourceId, message: &str) -> DbResult<()> {
        let mut inner = self.lock();
        let now = inner.next_time();
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        if build.status.is_terminal() {
            return Err(DbError::InvalidTransition(format!(
                "build {} already finished",
                id
            )));
        }
        build.status = BuildStatus::Error;
        build.log = Some(message.to_string());
        build.finished_at = Some(now);
        Ok(())
    }

    async fn finish(
        &self,
        id: ResourceId,
        status: BuildStatus,
        log: Option<&str>,
    ) -> DbResult<Build> {
        if !BuildStatus::Running.can_transition_to(status) || !status.is_terminal() {
            return Err(DbError::InvalidTransition(format!(
                "running -> {} is not a terminal transition",
                status
            )));
        }
        let mut inner = self.lock();
        let now = inner.next_time();
        let build = inner
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        if build.status != BuildStatus::Running {
            return Err(DbError::InvalidTransition(format!(
                "build {} is {}, not running",
                id, build.status
            )));
        }
        build.status = status;
        if let Some(log) = log {
            build.log = Some(log.to_string());
        }
        build.finished_at = Some(now);
        Ok(build.clone())
    }

    async fn cancel(&self, id: ResourceId) -> DbResult<bool> {
        let mut inner = self.lock();
        let now = inner.next_time();
        let Some(build) = inner.builds.iter_mut().find(|b| b.id == id) else {
            return Ok(false);
        };
        if build.status.is_terminal() {
            return Ok(false);
        }
        build.status = BuildStatus::Cancelled;
        build.finished_at = Some(now);
        Ok(true)
    }
}

#[async_trait]
impl ScheduledJobStore for MemoryStore {
    async fn find_enabled(&self, name: &str, callable: &str) -> DbResult<Option<RepeatableJob>> {
        Ok(self
            .lock()
            .jobs
            .iter()
            .find(|j| j.enabled && j.name == name && j.callable == callable)
            .cloned())
    }

    async fn create(
        &self,
        job: NewRepeatableJob<'_>,
        scheduled_time: DateTime<Utc>,
    ) -> DbResult<RepeatableJob> {
        let mut inner = self.lock();
        if inner
            .jobs
            .iter()
            .any(|j| j.enabled && j.name == job.name && j.callable == job.callable)
        {
            return Err(DbError::Duplicate(format!("repeatable job {}", job.name)));
        }
        let created_at = inner.next_time();
        let created = RepeatableJob {
            id: ResourceId::new(),
            name: job.name.to_string(),
            callable: job.callable.to_string(),
            enabled: true,
            interval: job.interval,
            interval_unit: job.interval_unit.to_string(),
            scheduled_time,
            queue: job.queue.to_string(),
            created_at,
        };
        inner.jobs.push(created.clone());
        Ok(created)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchBehavior {
    Accept,
    Transient,
    Permanent,
    PermanentFor(ResourceId),
}

pub struct MockExecutor {
    behavior: Mutex<DispatchBehavior>,
    dispatched: Mutex<Vec<DispatchRequest>>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(DispatchBehavior::Accept),
            dispatched: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: DispatchBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let behavior = *self.behavior.lock().unwrap();
        let build_id = request.build_id;
        self.dispatched.lock().unwrap().push(request);
        match behavior {
            DispatchBehavior::Accept => Ok(()),
            DispatchBehavior::Transient => {
                Err(DispatchError::Transient("executor unavailable".to_string()))
            }
            DispatchBehavior::Permanent => {
                Err(DispatchError::Permanent("invalid target".to_string()))
            }
            DispatchBehavior::PermanentFor(id) if id == build_id => {
                Err(DispatchError::Permanent("invalid target".to_string()))
            }
            DispatchBehavior::PermanentFor(_) => Ok(()),
        }
    }
}

/// Wired-up controller, scheduler, and stores for tests.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub executor: Arc<MockExecutor>,
    pub admission: AdmissionController,
    pub scheduler: Scheduler,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let executor = MockExecutor::new();
        let admission = AdmissionController::new(
            store.clone() as Arc<dyn RepositoryStore>,
            store.clone() as Arc<dyn PlanStore>,
            store.clone() as Arc<dyn BuildStore>,
        );
        let scheduler = Scheduler::new(
            store.clone() as Arc<dyn BuildStore>,
            executor.clone() as Arc<dyn Executor>,
        );
        Self {
            store,
            executor,
            admission,
            scheduler,
        }
    }

    pub async fn seed_repo(&self, owner: &str, name: &str) -> Repository {
        RepositoryStore::create(
            self.store.as_ref(),
            owner,
            name,
            &format!("https://github.com/{}/{}", owner, name),
        )
        .await
        .unwrap()
    }

    pub async fn seed_plan(
        &self,
        name: &str,
        trigger: TriggerKind,
        regex: Option<&str>,
        org: &str,
        concurrency_limit: i32,
    ) -> Plan {
        self.seed_plan_with_priority(name, trigger, regex, org, concurrency_limit, 0)
            .await
    }

    pub async fn seed_plan_with_priority(
        &self,
        name: &str,
        trigger: TriggerKind,
        regex: Option<&str>,
        org: &str,
        concurrency_limit: i32,
        priority: i32,
    ) -> Plan {
        self.store
            .create_plan(NewPlan {
                name,
                description: None,
                trigger,
                regex,
                org,
                priority,
                concurrency_limit,
                public: false,
            })
            .await
            .unwrap()
    }

    pub async fn bind(&self, plan_name: &str, repo: &str) -> PlanRepository {
        self.bind_with_org(plan_name, repo, None).await
    }

    pub async fn bind_with_org(
        &self,
        plan_name: &str,
        repo: &str,
        org: Option<&str>,
    ) -> PlanRepository {
        let identity: RepoIdentity = repo.parse().unwrap();
        let plan = self
            .store
            .get_plan_by_name(plan_name)
            .await
            .unwrap()
            .expect("seeded plan");
        let repo = self
            .store
            .get_by_identity(&identity.owner, &identity.name)
            .await
            .unwrap()
            .expect("seeded repository");
        PlanStore::bind(self.store.as_ref(), plan.id, repo.id, org)
            .await
            .unwrap()
    }

    pub async fn admit_commit(&self, repo: &str, branch: &str, sha: &str) -> Build {
        let admitted = self
            .admission
            .admit(&commit_event(repo, branch, sha))
            .await
            .unwrap();
        assert_eq!(admitted.len(), 1, "expected exactly one admitted build");
        admitted.into_iter().next().unwrap().build
    }

    pub async fn admit_commit_for_plan(
        &self,
        plan_name: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Build {
        self.admission
            .admit_manual(plan_name, &repo.parse().unwrap(), branch, sha)
            .await
            .unwrap()
            .build
    }
}
