pub mod catalog;
pub mod deployments;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /deployments   create + validate
/// /jobs          list, stats, get, logs, cancel
/// /environments  configured environments
/// /components    registry by platform
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/deployments", deployments::router())
        .nest("/jobs", jobs::router())
        .merge(catalog::router())
}
