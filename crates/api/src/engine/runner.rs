//! Background execution of one deployment job.
//!
//! A task waits for an execution slot, moves the job to `Running`, runs the
//! automation tool with output streamed into the job log, and records the
//! terminal status. Any error escaping the run is recorded as `Failed` at
//! the task boundary.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use rollout_core::execution::{
    run_process, CommandSpec, ExecError, OutputSink, ProcessOutcome, QueueTicket, Termination,
};
use rollout_core::job::{DeploymentResult, Job, JobStatus};
use rollout_core::types::{now, JobId, Timestamp};
use tokio_util::sync::CancellationToken;

use super::manager::JobManager;
use crate::error::AppResult;

/// Streams tool output into a job's log.
pub struct JobLogSink {
    manager: Arc<JobManager>,
    job_id: JobId,
}

impl OutputSink for JobLogSink {
    async fn on_line(&self, line: String) {
        if let Err(e) = self.manager.append_log(self.job_id, &line).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to append log line");
        }
    }
}

/// Task entry point. Never panics on job failure; errors and panics inside
/// the run end up on the job.
pub(super) async fn execute(
    manager: Arc<JobManager>,
    id: JobId,
    resolved: Vec<String>,
    ticket: QueueTicket,
    cancel: CancellationToken,
) {
    let task = {
        let manager = Arc::clone(&manager);
        let resolved = resolved.clone();
        async move { run(&manager, id, &resolved, ticket, &cancel).await }
    };

    if let Err(reason) = supervise(task).await {
        tracing::error!(job_id = %id, error = %reason, "Deployment task failed");
        let result = DeploymentResult {
            success: false,
            error: Some(reason.clone()),
            components: resolved,
            ..Default::default()
        };
        manager
            .fail_job(id, format!("Deployment failed: {reason}"), result)
            .await;
    }
    manager.forget_cancellation(id);
}

/// Drive `task` on its own tokio task so a panic comes back as an error
/// instead of unwinding out of the caller.
async fn supervise<F>(task: F) -> Result<(), String>
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!(
            "Execution task panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => Err(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
    }
}

async fn run(
    manager: &Arc<JobManager>,
    id: JobId,
    resolved: &[String],
    ticket: QueueTicket,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let _permit = tokio::select! {
        permit = manager.slots.acquire(ticket) => permit?,
        _ = cancel.cancelled() => {
            tracing::debug!(job_id = %id, "Job cancelled while queued");
            return Ok(());
        }
    };

    let job = manager.get_job(id).await?;
    if job.status != JobStatus::Queued {
        return Ok(());
    }

    let spec = manager.layout.build_command(id, &job.request, resolved);
    let message = format!(
        "Deploying {} component(s) to {}",
        resolved.len(),
        job.request.environment
    );
    match manager
        .update_status(id, JobStatus::Running, Some(message), None)
        .await
    {
        Ok(_) => {}
        // Cancelled between promotion and start.
        Err(e) if e.is_conflict() => return Ok(()),
        Err(e) => return Err(e),
    }

    tracing::info!(job_id = %id, command = %spec.display(), "Executing deployment");
    manager
        .append_log(id, &format!("Executing: {}", spec.display()))
        .await?;

    let sink = JobLogSink {
        manager: Arc::clone(manager),
        job_id: id,
    };
    let start_time = now();
    let outcome = run_process(&spec, &manager.limits, &sink, cancel).await;
    let end_time = now();

    let mut result = base_result(&job, &spec, resolved, start_time, end_time);
    let (status, message) = match outcome {
        Ok(outcome) => describe_outcome(&outcome, &mut result, manager.limits.timeout.as_secs()),
        Err(e) => describe_spawn_failure(&e, &mut result),
    };
    let Some(status) = status else {
        tracing::info!(job_id = %id, "Deployment process stopped after cancellation");
        return Ok(());
    };

    match manager
        .update_status(id, status, Some(message.clone()), Some(result))
        .await
    {
        Ok(_) => {
            tracing::info!(job_id = %id, status = %status, message = %message, "Deployment finished");
            Ok(())
        }
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) => Err(e),
    }
}

fn base_result(
    job: &Job,
    spec: &CommandSpec,
    resolved: &[String],
    start_time: Timestamp,
    end_time: Timestamp,
) -> DeploymentResult {
    let elapsed = (end_time - start_time).num_milliseconds().max(0);
    DeploymentResult {
        success: false,
        duration_seconds: Some(elapsed as f64 / 1000.0),
        start_time: Some(start_time),
        end_time: Some(end_time),
        command: Some(spec.display()),
        environment: Some(job.request.environment.clone()),
        components: resolved.to_vec(),
        execution_mode: Some(job.request.execution_mode),
        target_hosts: job.request.target_hosts.clone(),
        ..Default::default()
    }
}

/// Terminal status and message for a finished run. `None` status means the
/// run was cancelled and the job already reads `Cancelled`.
fn describe_outcome(
    outcome: &ProcessOutcome,
    result: &mut DeploymentResult,
    timeout_secs: u64,
) -> (Option<JobStatus>, String) {
    result.returncode = outcome.exit_code();
    result.output_tail = outcome.tail.clone();

    match outcome.termination {
        Termination::Exited(0) => {
            result.success = true;
            (
                Some(JobStatus::Completed),
                "Deployment completed successfully".to_string(),
            )
        }
        Termination::Exited(code) => {
            let message = format!("Deployment failed with exit code {code}");
            result.error = Some(message.clone());
            (Some(JobStatus::Failed), message)
        }
        Termination::TimedOut => {
            let message = format!("Deployment timed out after {timeout_secs} seconds");
            result.timed_out = true;
            result.error = Some(message.clone());
            (Some(JobStatus::Failed), message)
        }
        Termination::Cancelled => (None, String::new()),
    }
}

fn describe_spawn_failure(
    err: &ExecError,
    result: &mut DeploymentResult,
) -> (Option<JobStatus>, String) {
    result.error = Some(err.to_string());
    (Some(JobStatus::Failed), format!("Deployment failed: {err}"))
}
