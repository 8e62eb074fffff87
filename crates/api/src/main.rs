use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rollout_core::registry::ComponentRegistry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollout_api::background::job_retention;
use rollout_api::config::{EngineConfig, ServerConfig};
use rollout_api::engine::JobManager;
use rollout_api::router::build_app_router;
use rollout_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollout_api=debug,rollout_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        ansible_root = %engine_config.ansible_root.display(),
        max_concurrent_jobs = engine_config.max_concurrent_jobs,
        "Loaded configuration"
    );

    // --- Job store ---
    let pool = rollout_db::create_pool(&engine_config.database_url)
        .await
        .context("Failed to open job store")?;
    rollout_db::health_check(&pool)
        .await
        .context("Job store health check failed")?;
    rollout_db::run_migrations(&pool)
        .await
        .context("Failed to run job store migrations")?;
    tracing::info!("Job store ready");

    // --- Job engine ---
    let retention = engine_config.retention;
    let cleanup_interval = engine_config.cleanup_interval;
    let registry = Arc::new(ComponentRegistry::builtin());
    let manager = JobManager::start(pool.clone(), engine_config, registry)
        .await
        .context("Failed to start job manager")?;
    let (failed, requeued) = manager
        .recover()
        .await
        .context("Failed to recover jobs from previous run")?;
    tracing::info!(failed, requeued, "Job engine started");

    // --- Retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(job_retention::run(
        Arc::clone(&manager),
        retention,
        cleanup_interval,
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        manager: Arc::clone(&manager),
    };
    let app = build_app_router(state, &config).context("Invalid CORS configuration")?;

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Retention task stopped");

    manager
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    manager.pool().close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix). If a handler cannot
/// be installed, that signal source is ignored and the other still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
