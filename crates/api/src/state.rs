use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::JobManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Job store connection pool (health checks only; jobs go through the manager).
    pub pool: rollout_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// The single job manager for this process.
    pub manager: Arc<JobManager>,
}
