use axum::routing::post;
use axum::Router;

use crate::handlers::deployments;
use crate::state::AppState;

/// Routes mounted at `/deployments`.
///
/// ```text
/// POST   /                -> create_deployment
/// POST   /validate        -> validate_deployment
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(deployments::create_deployment))
        .route("/validate", post(deployments::validate_deployment))
}
