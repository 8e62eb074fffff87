//! Handlers for the `/jobs` resource.
//!
//! Every endpoint is scoped to the caller: listings only show the caller's
//! jobs, and reading or cancelling another caller's job is forbidden.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rollout_core::error::CoreError;
use rollout_core::job::{ExecutionMode, Job, JobStatus};
use rollout_core::types::{JobId, Timestamp};
use rollout_db::models::job::JobFilter;
use rollout_db::repositories::job_repo::DEFAULT_PAGE_SIZE;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::middleware::caller::CallerIdentity;
use crate::query::{JobListParams, LogOffsetParams};
use crate::response::DataResponse;
use crate::state::AppState;

/// A job without its logs, for listings.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub environment: String,
    pub components: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub owner: String,
    pub message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub log_lines: usize,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            environment: job.request.environment,
            components: job.request.components,
            execution_mode: job.request.execution_mode,
            owner: job.request.owner,
            message: job.message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            log_lines: job.logs.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Serialize)]
pub struct JobLogsResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub offset: usize,
    pub next_offset: usize,
    /// The job is terminal and its execution task has finished, so no
    /// further lines will be appended.
    pub complete: bool,
    pub logs: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job and verify the caller owns it.
async fn find_and_authorize(
    state: &AppState,
    job_id: JobId,
    caller: &CallerIdentity,
    action: &str,
) -> AppResult<Job> {
    let job = state.manager.get_job(job_id).await?;
    caller.ensure_owns(&job.request.owner, action)?;
    Ok(job)
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// The caller's jobs, most recent first. Supports `page`, `page_size` and
/// `status` query parameters.
pub async fn list_jobs(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> AppResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::BadRequest("page must be at least 1".into()));
    }
    let filter = JobFilter {
        status: params.status,
        owner: Some(caller.id),
    };
    let result = state
        .manager
        .list_jobs(&filter, page, params.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
        .await?;

    Ok(Json(DataResponse {
        data: JobListResponse {
            jobs: result.jobs.into_iter().map(JobSummary::from).collect(),
            total: result.total,
            page: result.page,
            page_size: result.page_size,
        },
    }))
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/stats
///
/// Status counts cover the caller's own jobs; executor load is global.
pub async fn job_statistics(
    caller: CallerIdentity,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let stats = state.manager.statistics(Some(&caller.id)).await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &caller, "view").await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/logs
///
/// Log entries from `offset` on. Clients poll with the returned
/// `next_offset` until `complete` is true.
pub async fn get_job_logs(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<LogOffsetParams>,
) -> AppResult<impl IntoResponse> {
    // Checked before reading so lines written by a stopping task are included.
    let executing = state.manager.is_executing(job_id);
    let job = find_and_authorize(&state, job_id, &caller, "view").await?;
    let (logs, next_offset) = state.manager.get_logs_since(job_id, params.offset).await?;

    Ok(Json(DataResponse {
        data: JobLogsResponse {
            job_id,
            status: job.status,
            offset: params.offset,
            next_offset,
            complete: job.status.is_terminal() && !executing,
            logs,
        },
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a queued or running job. Returns 204 on success, 409 if the job
/// is already in a terminal state.
pub async fn cancel_job(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &caller, "cancel").await?;

    if !state.manager.cancel(job_id).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Job is already in a terminal state and cannot be cancelled".into(),
        )));
    }

    tracing::info!(job_id = %job_id, caller = %caller.id, "Job cancelled via API");
    Ok(StatusCode::NO_CONTENT)
}
