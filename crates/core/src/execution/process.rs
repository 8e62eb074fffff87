//! Line-streaming subprocess runner.
//!
//! [`run_process`] spawns a [`CommandSpec`], forwards every stdout and
//! stderr line to an [`OutputSink`] as soon as it is read, and stops the
//! child when the wall-clock limit expires or the cancellation token fires.
//! Stopping sends SIGTERM to the child's process group first and SIGKILL
//! once the grace period has elapsed.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Capacity of the channel between the stream readers and the sink.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Lines longer than this are truncated before delivery (64 KiB).
const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long to keep draining output after the child has exited.
///
/// Grandchildren that inherited the pipes can hold them open indefinitely.
const POST_EXIT_DRAIN: Duration = Duration::from_secs(5);

/// Program, arguments and environment for one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child (inherits ours if `None`).
    pub working_directory: Option<PathBuf>,
    /// Additional environment variables set for the child.
    pub env_vars: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// The argv joined by single spaces, as recorded in job results.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Time and output bounds applied to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Wall-clock limit measured from spawn.
    pub timeout: Duration,
    /// Delay between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Number of trailing output lines kept in [`ProcessOutcome::tail`].
    pub tail_lines: usize,
}

/// Receives output lines in the order they were read.
///
/// Implementors must not block for long; the runner awaits each call before
/// reading the next line.
pub trait OutputSink: Send + Sync {
    fn on_line(&self, line: String) -> impl Future<Output = ()> + Send;
}

/// How the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child exited on its own. `-1` if it was killed by a signal we did
    /// not send.
    Exited(i32),
    /// The wall-clock limit expired and the child was stopped.
    TimedOut,
    /// The cancellation token fired and the child was stopped.
    Cancelled,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub duration: Duration,
    /// Total number of lines delivered to the sink.
    pub line_count: usize,
    /// The last `tail_lines` lines, oldest first.
    pub tail: Vec<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }

    /// Exit code when the child exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            Termination::TimedOut | Termination::Cancelled => None,
        }
    }
}

/// Errors that prevent a run from producing an outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Program not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Spawn `spec`, stream its output into `sink`, and wait for it to stop.
///
/// Returns `Err` only when the child could not be started or waited on.
/// Timeouts and cancellation are reported through
/// [`ProcessOutcome::termination`].
pub async fn run_process<S: OutputSink>(
    spec: &CommandSpec,
    limits: &ProcessLimits,
    sink: &S,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, ExecError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }
    // Own process group so signals reach the tool's workers too.
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| classify_spawn_error(&spec.program, e))?;
    tracing::debug!(program = %spec.program, pid = ?child.id(), "Spawned child process");

    let (tx, mut rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = start + limits.timeout;
    let mut tail = VecDeque::with_capacity(limits.tail_lines);
    let mut line_count = 0usize;
    let mut streams_open = true;
    let mut status: Option<ExitStatus> = None;
    let mut stopped_by: Option<Termination> = None;
    let mut kill_at: Option<Instant> = None;
    let mut drain_until: Option<Instant> = None;

    loop {
        if status.is_some() && !streams_open {
            break;
        }

        tokio::select! {
            line = rx.recv(), if streams_open => match line {
                Some(line) => {
                    line_count += 1;
                    if limits.tail_lines > 0 {
                        if tail.len() == limits.tail_lines {
                            tail.pop_front();
                        }
                        tail.push_back(line.clone());
                    }
                    sink.on_line(line).await;
                }
                None => streams_open = false,
            },

            exit = child.wait(), if status.is_none() => {
                status = Some(exit?);
                drain_until = Some(Instant::now() + POST_EXIT_DRAIN);
            }

            _ = cancel.cancelled(), if status.is_none() && stopped_by.is_none() => {
                tracing::info!(program = %spec.program, "Cancellation requested, terminating child");
                stopped_by = Some(Termination::Cancelled);
                kill_at = Some(terminate_or_kill(&mut child, limits.kill_grace));
            }

            _ = sleep_until(deadline), if status.is_none() && stopped_by.is_none() => {
                tracing::warn!(
                    program = %spec.program,
                    timeout_secs = limits.timeout.as_secs(),
                    "Timeout expired, terminating child",
                );
                stopped_by = Some(Termination::TimedOut);
                kill_at = Some(terminate_or_kill(&mut child, limits.kill_grace));
            }

            _ = sleep_until(kill_at.unwrap_or(deadline)), if status.is_none() && kill_at.is_some() => {
                tracing::warn!(program = %spec.program, "Grace period elapsed, killing child");
                force_kill(&mut child);
                kill_at = None;
            }

            _ = sleep_until(drain_until.unwrap_or(deadline)), if drain_until.is_some() && streams_open => {
                tracing::debug!(program = %spec.program, "Output still open after exit, abandoning drain");
                streams_open = false;
            }
        }
    }

    let termination = match (stopped_by, status) {
        (Some(reason), _) => reason,
        (None, Some(status)) => Termination::Exited(status.code().unwrap_or(-1)),
        // The loop only exits once `status` is set.
        (None, None) => Termination::Exited(-1),
    };

    Ok(ProcessOutcome {
        termination,
        duration: start.elapsed(),
        line_count,
        tail: tail.into(),
    })
}

fn classify_spawn_error(program: &str, err: io::Error) -> ExecError {
    match err.kind() {
        io::ErrorKind::NotFound => ExecError::NotFound(program.to_string()),
        io::ErrorKind::PermissionDenied => ExecError::PermissionDenied(program.to_string()),
        _ => ExecError::Spawn {
            program: program.to_string(),
            source: err,
        },
    }
}

/// Read `reader` line by line and forward each line into `tx`.
///
/// Invalid UTF-8 is replaced rather than ending the stream.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.len() > MAX_LINE_BYTES {
                    buf.truncate(MAX_LINE_BYTES);
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read child output");
                break;
            }
        }
    }
}

/// Ask the child to stop and return the instant at which to escalate.
///
/// Falls back to an immediate kill when SIGTERM cannot be delivered.
fn terminate_or_kill(child: &mut Child, grace: Duration) -> Instant {
    if !send_signal(child, Signal::Terminate) {
        force_kill(child);
    }
    Instant::now() + grace
}

fn force_kill(child: &mut Child) {
    send_signal(child, Signal::Kill);
    if let Err(e) = child.start_kill() {
        // Already reaped.
        tracing::debug!(error = %e, "start_kill on child failed");
    }
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: Signal) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the process group created for this child at spawn.
    let rc = unsafe { libc::kill(-pgid, signo) };
    rc == 0
}

#[cfg(not(unix))]
fn send_signal(_child: &Child, _signal: Signal) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::execution::test_helpers::{default_limits, write_temp_script, CollectingSink};

    fn script_spec(path: &std::path::Path) -> CommandSpec {
        CommandSpec::new(path.to_string_lossy())
    }

    #[test]
    fn display_joins_argv() {
        let spec = CommandSpec::new("ansible-playbook")
            .arg("site.yml")
            .args(["-i", "hosts.yml"]);
        assert_eq!(spec.display(), "ansible-playbook site.yml -i hosts.yml");
    }

    #[test]
    fn exit_code_only_for_natural_exit() {
        let outcome = ProcessOutcome {
            termination: Termination::TimedOut,
            duration: Duration::ZERO,
            line_count: 0,
            tail: vec![],
        };
        assert_eq!(outcome.exit_code(), None);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn streams_lines_in_order() {
        let script = write_temp_script("echo one\necho two\necho three\n");
        let sink = CollectingSink::default();

        let outcome = run_process(
            &script_spec(&script),
            &default_limits(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.line_count, 3);
        assert_eq!(sink.lines(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn captures_stderr_lines() {
        let script = write_temp_script("echo problem >&2\nexit 0\n");
        let sink = CollectingSink::default();

        run_process(
            &script_spec(&script),
            &default_limits(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(sink.lines(), vec!["problem"]);
    }

    #[tokio::test]
    async fn reports_nonzero_exit_with_tail() {
        let script =
            write_temp_script("i=0\nwhile [ $i -lt 15 ]; do echo line$i; i=$((i+1)); done\nexit 3\n");
        let sink = CollectingSink::default();

        let outcome = run_process(
            &script_spec(&script),
            &default_limits(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.termination, Termination::Exited(3));
        assert_eq!(outcome.line_count, 15);
        assert_eq!(outcome.tail.len(), 10);
        assert_eq!(outcome.tail.first().map(String::as_str), Some("line5"));
        assert_eq!(outcome.tail.last().map(String::as_str), Some("line14"));
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let spec = CommandSpec::new("/nonexistent/rollout-test-binary");
        let sink = CollectingSink::default();

        let err = run_process(&spec, &default_limits(), &sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, ExecError::NotFound(p) if p == "/nonexistent/rollout-test-binary");
    }

    #[tokio::test]
    async fn timeout_stops_child() {
        let script = write_temp_script("echo started\nsleep 30\n");
        let sink = CollectingSink::default();
        let limits = ProcessLimits {
            timeout: Duration::from_millis(300),
            ..default_limits()
        };

        let outcome = run_process(&script_spec(&script), &limits, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(outcome.duration < Duration::from_secs(10));
        assert_eq!(sink.lines(), vec!["started"]);
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_kill() {
        let script = write_temp_script("trap '' TERM\necho stubborn\nwhile true; do sleep 1; done\n");
        let sink = CollectingSink::default();
        let limits = ProcessLimits {
            timeout: Duration::from_millis(300),
            kill_grace: Duration::from_millis(300),
            tail_lines: 10,
        };

        let outcome = run_process(&script_spec(&script), &limits, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_stops_child() {
        let script = write_temp_script("echo ready\nsleep 30\n");
        let sink = CollectingSink::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let outcome = run_process(&script_spec(&script), &default_limits(), &sink, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(sink.lines(), vec!["ready"]);
    }

    #[tokio::test]
    async fn passes_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_temp_script("echo \"$ROLLOUT_TEST_VAR\"\npwd\n");
        let spec = script_spec(&script)
            .env("ROLLOUT_TEST_VAR", "hello")
            .current_dir(dir.path());
        let sink = CollectingSink::default();

        run_process(&spec, &default_limits(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        let lines = sink.lines();
        assert_eq!(lines[0], "hello");
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(
            std::fs::canonicalize(&lines[1]).unwrap(),
            canonical,
        );
    }
}
