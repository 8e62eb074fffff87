//! Structured outcome attached to a job once it reaches a terminal state.

use serde::{Deserialize, Serialize};

use super::request::ExecutionMode;
use crate::types::Timestamp;

/// Outcome of one deployment run.
///
/// Every field except `success` is optional on read so records written by
/// older or newer versions still decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentResult {
    pub success: bool,
    /// Tool exit code; `None` when the process never started or was killed.
    pub returncode: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// The argv that was run, joined by spaces.
    pub command: Option<String>,
    pub environment: Option<String>,
    /// Resolved deployment order.
    pub components: Vec<String>,
    pub execution_mode: Option<ExecutionMode>,
    pub target_hosts: Vec<String>,
    pub error: Option<String>,
    /// Last captured output lines, for diagnosing failures.
    pub output_tail: Vec<String>,
    pub timed_out: bool,
}
