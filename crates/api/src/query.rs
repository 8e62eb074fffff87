//! Shared query parameter types for API handlers.

use rollout_core::job::JobStatus;
use serde::Deserialize;

/// `GET /jobs` parameters (`?page=&page_size=&status=`).
///
/// `page` is 1-based. Values are clamped in the job manager.
#[derive(Debug, Deserialize)]
pub struct JobListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<JobStatus>,
}

/// `GET /jobs/{id}/logs` parameters (`?offset=`).
#[derive(Debug, Deserialize)]
pub struct LogOffsetParams {
    #[serde(default)]
    pub offset: usize,
}
