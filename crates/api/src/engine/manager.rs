//! The job manager: single authority over job lifecycle.
//!
//! All reads and writes of job records go through [`JobManager`]. Mutations
//! of one job are serialised by its entry in the [`LockTable`]; every
//! mutation is persisted before the cache is updated. Execution happens in
//! background tasks spawned by [`JobManager::create_job`] and
//! [`JobManager::recover`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rollout_core::error::CoreError;
use rollout_core::execution::{ExecutionSlots, PlaybookLayout, ProcessLimits, QueueTicket};
use rollout_core::job::{
    validate_request, DeploymentRequest, DeploymentResult, Job, JobStatus,
};
use rollout_core::registry::{estimate_minutes, resolve, ComponentRegistry};
use rollout_core::types::{now, JobId};
use rollout_db::models::job::JobFilter;
use rollout_db::repositories::JobRepo;
use rollout_db::DbPool;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::cache::{JobCache, LockTable};
use super::runner;
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};

/// Jobs created within this window are loaded into the cache at startup.
const WARM_WINDOW_HOURS: i64 = 24;

/// Maximum jobs loaded into the cache at startup, and its soft capacity.
const CACHE_CAPACITY: usize = 1000;

/// Delay before the single retry of a failed store operation.
const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

pub const MSG_CANCELLED: &str = "Job cancelled by user";
pub const MSG_INTERRUPTED: &str = "Job interrupted by server restart";

/// One page of a job listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// Result of validating a request without creating a job.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPreview {
    pub valid: bool,
    pub errors: Vec<String>,
    pub resolved_components: Vec<String>,
    pub estimated_minutes: u32,
}

/// Job counts over the recent window plus live executor load.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatistics {
    pub window_hours: i64,
    pub total: i64,
    pub by_status: BTreeMap<JobStatus, i64>,
    pub running: usize,
    pub pending: usize,
    pub max_concurrent: usize,
    /// Completed share of finished jobs, `None` when nothing finished.
    pub success_rate: Option<f64>,
}

pub struct JobManager {
    pub(super) pool: DbPool,
    pub(super) config: Arc<EngineConfig>,
    pub(super) registry: Arc<ComponentRegistry>,
    pub(super) layout: PlaybookLayout,
    pub(super) limits: ProcessLimits,
    pub(super) slots: ExecutionSlots,
    cache: JobCache,
    locks: LockTable,
    cancellations: Mutex<HashMap<JobId, CancellationToken>>,
    tasks: TaskTracker,
}

impl JobManager {
    /// Build the manager and warm its cache from the store.
    pub async fn start(
        pool: DbPool,
        config: EngineConfig,
        registry: Arc<ComponentRegistry>,
    ) -> AppResult<Arc<Self>> {
        let manager = Self {
            layout: config.layout(),
            limits: config.limits(),
            slots: ExecutionSlots::new(config.max_concurrent_jobs, config.max_queued_jobs),
            config: Arc::new(config),
            pool,
            registry,
            cache: JobCache::new(CACHE_CAPACITY),
            locks: LockTable::default(),
            cancellations: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        };

        let since = now() - chrono::Duration::hours(WARM_WINDOW_HOURS);
        let recent =
            with_retry("list_recent", || JobRepo::list_recent(&manager.pool, since, CACHE_CAPACITY as i64))
                .await?;
        let warmed = recent.len();
        for job in recent {
            manager.cache.put(job).await;
        }
        tracing::info!(warmed, "Job cache warmed");

        Ok(Arc::new(manager))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &PlaybookLayout {
        &self.layout
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Validate `request`, persist it as a queued job and schedule its
    /// execution. Returns without waiting for the job to run.
    pub async fn create_job(self: &Arc<Self>, request: DeploymentRequest) -> AppResult<Job> {
        let resolved = self.check_request(&request)?;
        let ticket = self.slots.try_enqueue()?;

        let job = Job::new(request, now());
        with_retry("insert", || JobRepo::insert(&self.pool, &job)).await?;
        self.cache.put(job.clone()).await;

        tracing::info!(
            job_id = %job.id,
            environment = %job.request.environment,
            owner = %job.request.owner,
            components = ?resolved,
            "Deployment job queued",
        );

        self.spawn_execution(job.id, resolved, ticket);
        Ok(job)
    }

    /// Run the creation checks without side effects.
    pub fn preview(&self, request: &DeploymentRequest) -> DeploymentPreview {
        match self.check_request(request) {
            Ok(resolved) => DeploymentPreview {
                valid: true,
                errors: Vec::new(),
                estimated_minutes: estimate_minutes(&resolved),
                resolved_components: resolved,
            },
            Err(e) => DeploymentPreview {
                valid: false,
                errors: vec![e.to_string()],
                resolved_components: Vec::new(),
                estimated_minutes: 0,
            },
        }
    }

    /// Synchronous checks shared by creation and preview. Returns the
    /// resolved deployment order.
    fn check_request(&self, request: &DeploymentRequest) -> Result<Vec<String>, CoreError> {
        validate_request(request, &self.config.environments)?;
        if !self.layout.has_inventory(&request.environment) {
            return Err(CoreError::Validation(format!(
                "Inventory not found for environment: {}",
                request.environment
            )));
        }
        Ok(resolve(&self.registry, &request.components)?)
    }

    fn spawn_execution(self: &Arc<Self>, id: JobId, resolved: Vec<String>, ticket: QueueTicket) {
        let cancel = CancellationToken::new();
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cancel.clone());

        let manager = Arc::clone(self);
        self.tasks
            .spawn(async move { runner::execute(manager, id, resolved, ticket, cancel).await });
    }

    pub(super) fn forget_cancellation(&self, id: JobId) {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Move a job to `status`. Illegal transitions fail with `Conflict` and
    /// leave the job untouched.
    pub async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
        result: Option<DeploymentResult>,
    ) -> AppResult<Job> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut job = self.load(id).await?;
        job.transition(status, message, result, now())?;
        self.persist(&job).await?;

        tracing::debug!(job_id = %id, status = %status, "Job status updated");
        Ok(job)
    }

    /// Append one output line to a job's log, timestamped now.
    pub async fn append_log(&self, id: JobId, line: &str) -> AppResult<()> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut job = self.load(id).await?;
        job.push_log(line, now());
        let entry = job.logs.last().map(String::as_str).unwrap_or_default();

        let appended = with_retry("append_log", || {
            JobRepo::append_log(&self.pool, id, entry, job.updated_at)
        })
        .await?;
        if !appended {
            return Err(AppError::not_found(id));
        }
        self.cache.put(job).await;
        Ok(())
    }

    /// Cancel a queued or running job.
    ///
    /// Returns `false`, changing nothing, when the job is already terminal.
    /// A running tool process is signalled to stop; the job record reads
    /// `Cancelled` before the process has exited.
    pub async fn cancel(&self, id: JobId) -> AppResult<bool> {
        {
            let lock = self.locks.lock_for(id);
            let _guard = lock.lock().await;

            let mut job = self.load(id).await?;
            if job.status.is_terminal() {
                return Ok(false);
            }
            job.transition(
                JobStatus::Cancelled,
                Some(MSG_CANCELLED.to_string()),
                None,
                now(),
            )?;
            self.persist(&job).await?;
        }

        let token = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(token) = token {
            token.cancel();
        }

        tracing::info!(job_id = %id, "Job cancelled");
        Ok(true)
    }

    /// Record a failure caught at the task boundary.
    ///
    /// A queued job is walked through `Running` first. Jobs that are already
    /// terminal are left alone.
    pub(super) async fn fail_job(&self, id: JobId, message: String, result: DeploymentResult) {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut job = match self.load(id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Cannot load job to record failure");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }

        let at = now();
        if job.status == JobStatus::Queued {
            if let Err(e) = job.transition(JobStatus::Running, None, None, at) {
                tracing::error!(job_id = %id, error = %e, "Cannot start job to record failure");
                return;
            }
        }
        if let Err(e) = job.transition(JobStatus::Failed, Some(message), Some(result), at) {
            tracing::error!(job_id = %id, error = %e, "Cannot record job failure");
            return;
        }
        if let Err(e) = self.persist(&job).await {
            tracing::error!(job_id = %id, error = %e, "Failed to persist job failure");
        }
    }

    /// Write `job` to the store, then the cache.
    async fn persist(&self, job: &Job) -> AppResult<()> {
        let updated = with_retry("update", || JobRepo::update(&self.pool, job)).await?;
        if !updated {
            return Err(AppError::not_found(job.id));
        }
        self.cache.put(job.clone()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_job(&self, id: JobId) -> AppResult<Job> {
        self.load(id).await
    }

    /// Cache first, then the store. Store hits are cached.
    async fn load(&self, id: JobId) -> AppResult<Job> {
        if let Some(job) = self.cache.get(id).await {
            return Ok(job);
        }
        let job = with_retry("find_by_id", || JobRepo::find_by_id(&self.pool, id))
            .await?
            .ok_or_else(|| AppError::not_found(id))?;
        self.cache.put(job.clone()).await;
        Ok(job)
    }

    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: i64,
        page_size: i64,
    ) -> AppResult<JobPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, rollout_db::repositories::job_repo::MAX_PAGE_SIZE);
        let (jobs, total) =
            with_retry("list", || JobRepo::list(&self.pool, filter, page, page_size)).await?;
        Ok(JobPage {
            jobs,
            total,
            page,
            page_size,
        })
    }

    pub async fn get_logs(&self, id: JobId) -> AppResult<Vec<String>> {
        Ok(self.load(id).await?.logs)
    }

    /// Log entries from `offset` on, plus the offset to resume from.
    pub async fn get_logs_since(&self, id: JobId, offset: usize) -> AppResult<(Vec<String>, usize)> {
        let logs = self.load(id).await?.logs;
        let next = logs.len();
        let entries = logs.into_iter().skip(offset).collect();
        Ok((entries, next.max(offset)))
    }

    /// Counts are limited to `owner`'s jobs when given; executor load is
    /// always process-wide.
    pub async fn statistics(&self, owner: Option<&str>) -> AppResult<JobStatistics> {
        let since = now() - chrono::Duration::hours(WARM_WINDOW_HOURS);
        let counts =
            with_retry("status_counts", || JobRepo::status_counts(&self.pool, since, owner)).await?;
        let by_status: BTreeMap<JobStatus, i64> = counts.into_iter().collect();

        let completed = by_status.get(&JobStatus::Completed).copied().unwrap_or(0);
        let failed = by_status.get(&JobStatus::Failed).copied().unwrap_or(0);
        let finished = completed + failed;

        Ok(JobStatistics {
            window_hours: WARM_WINDOW_HOURS,
            total: by_status.values().sum(),
            by_status,
            running: self.slots.running(),
            pending: self.slots.pending(),
            max_concurrent: self.slots.ceiling(),
            success_rate: (finished > 0).then(|| completed as f64 / finished as f64),
        })
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Purge terminal jobs whose last update is older than `older_than`.
    pub async fn cleanup(&self, older_than: Duration) -> AppResult<u64> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| AppError::InternalError(format!("Retention window out of range: {e}")))?;
        let cutoff = now() - age;

        let deleted =
            with_retry("delete_older_than", || JobRepo::delete_older_than(&self.pool, cutoff, true))
                .await?;
        self.cache.purge_terminal_before(cutoff).await;
        for id in &deleted {
            self.locks.remove(*id);
        }
        let deleted = deleted.len() as u64;

        tracing::debug!(deleted, %cutoff, "Retention sweep finished");
        Ok(deleted)
    }

    /// Reconcile jobs left behind by a previous process.
    ///
    /// Running jobs lost their tool process and are marked failed. Queued
    /// jobs are scheduled again. Returns `(failed, requeued)`.
    pub async fn recover(self: &Arc<Self>) -> AppResult<(usize, usize)> {
        let orphans = with_retry("list_by_status", || {
            JobRepo::list_by_status(&self.pool, &[JobStatus::Running, JobStatus::Queued])
        })
        .await?;

        let mut failed = 0;
        let mut requeued = 0;
        for job in orphans {
            match job.status {
                JobStatus::Running => {
                    let result = DeploymentResult {
                        success: false,
                        error: Some(MSG_INTERRUPTED.to_string()),
                        environment: Some(job.request.environment.clone()),
                        execution_mode: Some(job.request.execution_mode),
                        target_hosts: job.request.target_hosts.clone(),
                        ..Default::default()
                    };
                    self.fail_job(job.id, MSG_INTERRUPTED.to_string(), result).await;
                    failed += 1;
                }
                JobStatus::Queued => {
                    let scheduled = resolve(&self.registry, &job.request.components)
                        .map_err(CoreError::from)
                        .and_then(|resolved| Ok((resolved, self.slots.try_enqueue()?)));
                    match scheduled {
                        Ok((resolved, ticket)) => {
                            self.spawn_execution(job.id, resolved, ticket);
                            requeued += 1;
                        }
                        Err(e) => {
                            let message = format!("Deployment failed: {e}");
                            let result = DeploymentResult {
                                success: false,
                                error: Some(e.to_string()),
                                ..Default::default()
                            };
                            self.fail_job(job.id, message, result).await;
                            failed += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        if failed + requeued > 0 {
            tracing::warn!(failed, requeued, "Recovered jobs from previous run");
        }
        Ok((failed, requeued))
    }

    /// Cancel every active job and wait up to `timeout` for their tasks.
    pub async fn shutdown(&self, timeout: Duration) {
        let active: Vec<JobId> = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();

        for id in &active {
            if let Err(e) = self.cancel(*id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to cancel job during shutdown");
            }
        }

        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Timed out waiting for job tasks to stop"
            );
        } else {
            tracing::info!(cancelled = active.len(), "Job tasks stopped");
        }
    }

    /// Whether `id` still has a live execution task that may append logs.
    pub fn is_executing(&self, id: JobId) -> bool {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of jobs with a live execution task.
    pub fn active_jobs(&self) -> usize {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Run a store operation, retrying once after a short delay.
///
/// Decode failures are not retried; the row will not get better.
async fn with_retry<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match f().await {
        Ok(value) => Ok(value),
        Err(e @ sqlx::Error::Decode(_)) => Err(e),
        Err(e) => {
            tracing::warn!(op, error = %e, "Store operation failed, retrying once");
            tokio::time::sleep(STORE_RETRY_DELAY).await;
            f().await
        }
    }
}
