#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use rollout_api::config::{EngineConfig, ServerConfig};
use rollout_api::engine::JobManager;
use rollout_api::router::build_app_router;
use rollout_api::state::AppState;
use rollout_core::job::{DeploymentRequest, ExecutionMode, Job, JobStatus};
use rollout_core::registry::ComponentRegistry;
use rollout_core::types::JobId;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const CALLER: &str = "ops-team";

/// A temporary automation root, job store and running manager.
pub struct TestEnv {
    pub dir: TempDir,
    pub manager: Arc<JobManager>,
}

impl TestEnv {
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("ansible")
    }

    /// Arguments the fake tool received on its most recent run, one per line.
    pub fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("args.txt"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// Lay out an automation root with a `staging` inventory and a fake tool
/// whose body is `script`. The tool records its argv to `args.txt` first.
pub async fn setup(script: &str, tweak: impl FnOnce(&mut EngineConfig)) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("ansible");
    std::fs::create_dir_all(root.join("inventory/staging")).unwrap();
    std::fs::create_dir_all(root.join("playbooks")).unwrap();
    std::fs::write(root.join("inventory/staging/hosts.yml"), "all:\n  hosts: {}\n").unwrap();
    std::fs::write(root.join("playbooks/universal.yml"), "- hosts: all\n").unwrap();

    let tool = dir.path().join("fake-playbook.sh");
    std::fs::write(
        &tool,
        format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > \"$PWD/args.txt\"\n{script}\n"),
    )
    .unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let mut config = EngineConfig::new(url, &root);
    config.tool_binary = tool.to_string_lossy().into_owned();
    config.job_timeout = Duration::from_secs(30);
    config.kill_grace = Duration::from_millis(500);
    tweak(&mut config);

    let manager = start_manager(&config).await;
    TestEnv { dir, manager }
}

/// Open the store named by `config` and start a manager on it.
pub async fn start_manager(config: &EngineConfig) -> Arc<JobManager> {
    let pool = rollout_db::create_pool(&config.database_url).await.unwrap();
    rollout_db::run_migrations(&pool).await.unwrap();
    JobManager::start(pool, config.clone(), Arc::new(ComponentRegistry::builtin()))
        .await
        .unwrap()
}

pub fn request(components: &[&str]) -> DeploymentRequest {
    DeploymentRequest {
        environment: "staging".to_string(),
        components: components.iter().map(|s| s.to_string()).collect(),
        target_hosts: vec![],
        execution_mode: ExecutionMode::Normal,
        options: Map::new(),
        owner: CALLER.to_string(),
    }
}

/// Poll until the job satisfies `done`, panicking after `timeout`.
pub async fn wait_for(
    manager: &JobManager,
    id: JobId,
    timeout: Duration,
    done: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = manager.get_job(id).await.unwrap();
        if done(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not reach the expected state, last seen: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_status(manager: &JobManager, id: JobId, status: JobStatus) -> Job {
    wait_for(manager, id, Duration::from_secs(10), |job| job.status == status).await
}

/// Wait until no execution task is alive.
pub async fn wait_idle(manager: &JobManager) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while manager.active_jobs() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "job tasks did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Build the full application router over the environment's manager.
pub fn build_test_app(env: &TestEnv) -> Router {
    let config = test_config();
    let state = AppState {
        pool: env.manager.pool().clone(),
        config: Arc::new(config.clone()),
        manager: Arc::clone(&env.manager),
    };
    build_app_router(state, &config).unwrap()
}

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    caller: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("x-caller-id", caller);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: Router, uri: &str, caller: Option<&str>) -> Response {
    send(app, Method::GET, uri, caller, None).await
}

pub async fn post_json(app: Router, uri: &str, caller: Option<&str>, body: Value) -> Response {
    send(app, Method::POST, uri, caller, Some(body)).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
