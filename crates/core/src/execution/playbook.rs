//! Builds the automation tool invocation for a deployment.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::process::CommandSpec;
use crate::job::DeploymentRequest;
use crate::types::JobId;

/// Where the playbook, inventories and tool binary live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookLayout {
    /// Automation root; the tool runs with this as its working directory.
    pub root: PathBuf,
    /// Tool executable, resolved through `PATH` when not absolute.
    pub tool_binary: String,
    /// Playbook path, relative to `root` unless absolute.
    pub playbook: PathBuf,
}

impl PlaybookLayout {
    pub fn new(root: impl Into<PathBuf>, tool_binary: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            tool_binary: tool_binary.into(),
            playbook: PathBuf::from("playbooks/universal.yml"),
        }
    }

    pub fn with_playbook(mut self, playbook: impl Into<PathBuf>) -> Self {
        self.playbook = playbook.into();
        self
    }

    pub fn playbook_path(&self) -> PathBuf {
        self.root.join(&self.playbook)
    }

    pub fn inventory_dir(&self) -> PathBuf {
        self.root.join("inventory")
    }

    /// `<root>/inventory/<environment>/hosts.yml`
    pub fn inventory_path(&self, environment: &str) -> PathBuf {
        self.inventory_dir().join(environment).join("hosts.yml")
    }

    pub fn has_inventory(&self, environment: &str) -> bool {
        self.inventory_path(environment).is_file()
    }

    /// The full invocation for `request`, deploying `resolved` in order.
    pub fn build_command(
        &self,
        job_id: JobId,
        request: &DeploymentRequest,
        resolved: &[String],
    ) -> CommandSpec {
        let selected = serde_json::to_string(resolved).unwrap_or_else(|_| "[]".to_string());

        let mut spec = CommandSpec::new(&self.tool_binary)
            .arg(path_arg(&self.playbook_path()))
            .arg("-i")
            .arg(path_arg(&self.inventory_path(&request.environment)))
            .args(["--extra-vars", "execution_mode=components"])
            .arg("--extra-vars")
            .arg(format!("selected_components={selected}"));

        let mode = request.execution_mode;
        if mode != Default::default() {
            spec = spec
                .arg("--extra-vars")
                .arg(format!("execution_mode={}", mode.as_str()));
        }
        if mode.is_check() {
            spec = spec.arg("--check");
        }

        for (key, value) in &request.options {
            spec = spec
                .arg("--extra-vars")
                .arg(format!("{key}={}", extra_var_value(value)));
        }

        if !request.target_hosts.is_empty() {
            spec = spec.arg("--limit").arg(request.target_hosts.join(","));
        }

        if request.verbose() {
            spec = spec.arg("-vv");
        }

        spec.current_dir(&self.root)
            .env("PYTHONUNBUFFERED", "1")
            .env("ANSIBLE_NOCOLOR", "1")
            .env("ROLLOUT_JOB_ID", job_id.to_string())
    }
}

/// Strings pass through verbatim; everything else is JSON-encoded.
fn extra_var_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
