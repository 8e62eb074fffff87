use axum::routing::get;
use axum::Router;

use crate::handlers::catalog;
use crate::state::AppState;

/// Catalogue routes, merged at the `/api/v1` root.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/environments", get(catalog::list_environments))
        .route("/components", get(catalog::list_components))
}
