//! Row codec for the `jobs` table.
//!
//! Rows hold raw text; [`JobRow::into_job`] does the fallible decoding so a
//! single bad record can be skipped instead of failing a whole query.

use chrono::{DateTime, SecondsFormat, Utc};
use rollout_core::job::{DeploymentRequest, DeploymentResult, Job, JobStatus};
use rollout_core::types::{JobId, Timestamp};
use sqlx::FromRow;

/// A raw row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub owner: String,
    pub created_at: String,
    pub updated_at: String,
    pub request: String,
    pub message: Option<String>,
    pub result: Option<String>,
    pub logs: Option<String>,
}

/// Encoded column values for writing a [`Job`].
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: &'static str,
    pub owner: String,
    pub created_at: String,
    pub updated_at: String,
    pub request: String,
    pub message: Option<String>,
    pub result: Option<String>,
    pub logs: String,
}

/// Why a stored row could not be turned back into a [`Job`].
#[derive(Debug, thiserror::Error)]
#[error("Corrupt job record {id}: invalid {field} ({reason})")]
pub struct RecordError {
    pub id: String,
    pub field: &'static str,
    pub reason: String,
}

/// Filter for job listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub owner: Option<String>,
}

/// Fixed-width UTC timestamp text, so string order is time order.
pub fn encode_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_timestamp(raw: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

impl JobRecord {
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: job.id.to_string(),
            status: job.status.as_str(),
            owner: job.request.owner.clone(),
            created_at: encode_timestamp(job.created_at),
            updated_at: encode_timestamp(job.updated_at),
            request: serde_json::to_string(&job.request)?,
            message: job.message.clone(),
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            logs: serde_json::to_string(&job.logs)?,
        })
    }
}

impl JobRow {
    pub fn into_job(self) -> Result<Job, RecordError> {
        let id = self.id;
        let fail = |field: &'static str, reason: String| RecordError {
            id: id.clone(),
            field,
            reason,
        };

        let job_id: JobId = id.parse().map_err(|e| fail("id", format!("{e}")))?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| fail("status", format!("{e}")))?;
        let created_at =
            decode_timestamp(&self.created_at).map_err(|e| fail("created_at", e.to_string()))?;
        let updated_at =
            decode_timestamp(&self.updated_at).map_err(|e| fail("updated_at", e.to_string()))?;
        let request: DeploymentRequest =
            serde_json::from_str(&self.request).map_err(|e| fail("request", e.to_string()))?;

        let result = match self.result.as_deref().map(str::trim) {
            None | Some("") | Some("null") => None,
            Some(raw) => Some(
                serde_json::from_str::<DeploymentResult>(raw)
                    .map_err(|e| fail("result", e.to_string()))?,
            ),
        };

        let logs = match self.logs.as_deref().map(str::trim) {
            None | Some("") | Some("null") => Vec::new(),
            Some(raw) => {
                serde_json::from_str::<Vec<String>>(raw).map_err(|e| fail("logs", e.to_string()))?
            }
        };

        Ok(Job {
            id: job_id,
            status,
            created_at,
            updated_at,
            request,
            message: self.message,
            result,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::Map;

    use super::*;
    use rollout_core::job::ExecutionMode;

    fn job() -> Job {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Job::new(
            DeploymentRequest {
                environment: "staging".to_string(),
                components: vec!["python".to_string()],
                target_hosts: vec![],
                execution_mode: ExecutionMode::Normal,
                options: Map::new(),
                owner: "ops".to_string(),
            },
            now,
        )
    }

    fn row_from(record: JobRecord) -> JobRow {
        JobRow {
            id: record.id,
            status: record.status.to_string(),
            owner: record.owner,
            created_at: record.created_at,
            updated_at: record.updated_at,
            request: record.request,
            message: record.message,
            result: record.result,
            logs: Some(record.logs),
        }
    }

    #[test]
    fn record_decodes_back_to_job() {
        let job = job();
        let row = row_from(JobRecord::from_job(&job).unwrap());
        assert_eq!(row.into_job().unwrap(), job);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(encode_timestamp(a) < encode_timestamp(b));
        assert_eq!(encode_timestamp(a), "2026-01-09T23:59:59.000000Z");
    }

    #[test]
    fn missing_logs_and_result_decode_to_defaults() {
        let mut row = row_from(JobRecord::from_job(&job()).unwrap());
        row.logs = None;
        row.result = Some("null".to_string());

        let decoded = row.into_job().unwrap();
        assert!(decoded.logs.is_empty());
        assert!(decoded.result.is_none());
    }

    #[test]
    fn bad_status_names_the_field() {
        let mut row = row_from(JobRecord::from_job(&job()).unwrap());
        row.status = "exploded".to_string();

        assert_matches!(row.into_job(), Err(RecordError { field: "status", .. }));
    }

    #[test]
    fn garbage_request_is_rejected() {
        let mut row = row_from(JobRecord::from_job(&job()).unwrap());
        row.request = "{not json".to_string();

        assert_matches!(row.into_job(), Err(RecordError { field: "request", .. }));
    }
}
