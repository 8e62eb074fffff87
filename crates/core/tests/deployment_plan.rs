//! Resolve a request, build its tool invocation and run it end to end.

use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use rollout_core::error::CoreError;
use rollout_core::execution::{run_process, OutputSink, PlaybookLayout, ProcessLimits, Termination};
use rollout_core::job::DeploymentRequest;
use rollout_core::registry::{resolve, ComponentRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl OutputSink for Lines {
    async fn on_line(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }
}

fn request(value: serde_json::Value) -> DeploymentRequest {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn resolved_plan_reaches_the_tool_in_order() {
    let registry = ComponentRegistry::builtin();
    let req = request(json!({
        "environment": "staging",
        "components": ["macos-tracker"],
        "target_hosts": ["mac-01", "mac-02"],
    }));

    let resolved = resolve(&registry, &req.components).unwrap();
    assert_eq!(resolved.first().map(String::as_str), Some("base-system"));
    assert_eq!(resolved.last().map(String::as_str), Some("macos-tracker"));

    let dir = tempfile::tempdir().unwrap();
    let layout = PlaybookLayout::new(dir.path(), "echo");
    let spec = layout.build_command(Uuid::new_v4(), &req, &resolved);

    let limits = ProcessLimits {
        timeout: Duration::from_secs(5),
        kill_grace: Duration::from_millis(200),
        tail_lines: 5,
    };
    let sink = Lines::default();
    let outcome = run_process(&spec, &limits, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Exited(0));
    let lines = sink.0.lock().unwrap();
    assert_eq!(lines.len(), 1);
    let selected = serde_json::to_string(&resolved).unwrap();
    assert!(lines[0].contains(&format!("selected_components={selected}")));
    assert!(lines[0].contains("--limit mac-01,mac-02"));
    assert!(lines[0].contains("inventory/staging/hosts.yml"));
}

#[test]
fn unknown_names_are_all_reported() {
    let registry = ComponentRegistry::builtin();
    let err = resolve(
        &registry,
        &["python".to_string(), "nope".to_string(), "bogus".to_string()],
    )
    .unwrap_err();
    assert_matches!(
        CoreError::from(err),
        CoreError::UnknownComponents(names) if names == ["nope", "bogus"]
    );
}
