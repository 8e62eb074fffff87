//! The deployment job record and its lifecycle rules.

pub mod request;
pub mod result;
pub mod status;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

pub use request::{validate_request, DeploymentRequest, ExecutionMode};
pub use result::DeploymentResult;
pub use status::{JobStatus, TERMINAL_STATUSES};

/// Status message given to every freshly created job.
pub const MSG_JOB_QUEUED: &str = "Job created and queued";

/// One tracked deployment request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub request: DeploymentRequest,
    pub message: Option<String>,
    pub result: Option<DeploymentResult>,
    /// Timestamped output lines, append-only.
    pub logs: Vec<String>,
}

impl Job {
    /// Build a new `Queued` job. `created_at` and `updated_at` are equal.
    pub fn new(request: DeploymentRequest, now: Timestamp) -> Self {
        Self {
            id: JobId::new_v4(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            request,
            message: Some(MSG_JOB_QUEUED.to_string()),
            result: None,
            logs: Vec::new(),
        }
    }

    /// Apply a status transition, rejecting edges the state machine lacks.
    ///
    /// On error the job is left untouched. `message` and `result` replace
    /// the current values only when provided.
    pub fn transition(
        &mut self,
        next: JobStatus,
        message: Option<String>,
        result: Option<DeploymentResult>,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        self.status.check_transition(next)?;
        self.status = next;
        if message.is_some() {
            self.message = message;
        }
        if result.is_some() {
            self.result = result;
        }
        self.touch(now);
        Ok(())
    }

    /// Append one output line, prefixed with its capture time.
    pub fn push_log(&mut self, line: &str, now: Timestamp) {
        self.logs.push(format_log_line(line, now));
        self.touch(now);
    }

    /// Advance `updated_at` without ever moving it backwards.
    fn touch(&mut self, now: Timestamp) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Format a captured line as `[<rfc3339>] <line>`.
pub fn format_log_line(line: &str, now: Timestamp) -> String {
    format!(
        "[{}] {}",
        now.to_rfc3339_opts(SecondsFormat::Micros, true),
        line
    )
}
