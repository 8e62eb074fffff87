//! Subprocess execution for deployment jobs.
//!
//! [`process::run_process`] spawns the automation tool, streams its
//! combined output line by line into an [`process::OutputSink`], and
//! enforces the wall-clock timeout and cooperative cancellation with a
//! terminate-then-kill escalation. [`slots::ExecutionSlots`] caps how many
//! tool processes run at once. [`playbook`] builds the tool's argv from a
//! deployment request.
//!
//! Nothing here touches the job store; callers decide what an outcome means
//! for the job record.

pub mod playbook;
pub mod process;
pub mod slots;

pub use playbook::PlaybookLayout;
pub use process::{
    run_process, CommandSpec, ExecError, OutputSink, ProcessLimits, ProcessOutcome, Termination,
};
pub use slots::{ExecutionSlots, QueueTicket, SlotPermit};

/// Shared test helpers for executor tests.
#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::process::{OutputSink, ProcessLimits};

    /// Sink that records every delivered line.
    #[derive(Default)]
    pub struct CollectingSink {
        pub lines: Mutex<Vec<String>>,
    }

    impl CollectingSink {
        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().expect("sink lock").clone()
        }
    }

    impl OutputSink for CollectingSink {
        async fn on_line(&self, line: String) {
            self.lines.lock().expect("sink lock").push(line);
        }
    }

    /// Limits with a 5-second timeout and a short kill grace.
    pub fn default_limits() -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(5),
            kill_grace: Duration::from_millis(500),
            tail_lines: 10,
        }
    }

    /// Write an executable `/bin/sh` script with the given body.
    pub fn write_temp_script(body: &str) -> tempfile::TempPath {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut f = tempfile::Builder::new()
            .suffix(".sh")
            .tempfile()
            .expect("create temp file");
        writeln!(f, "#!/bin/sh").expect("write shebang");
        write!(f, "{body}").expect("write body");
        let path = f.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }
}
