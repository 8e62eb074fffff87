//! Read-only catalogue endpoints: environments and components.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use rollout_core::registry::ComponentSpec;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::caller::CallerIdentity;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EnvironmentInfo {
    pub name: String,
    /// Whether `inventory/<name>/hosts.yml` exists.
    pub inventory_present: bool,
}

/// GET /api/v1/environments
pub async fn list_environments(
    _caller: CallerIdentity,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let layout = state.manager.layout();
    let environments: Vec<EnvironmentInfo> = state
        .manager
        .config()
        .environments
        .iter()
        .map(|name| EnvironmentInfo {
            name: name.clone(),
            inventory_present: layout.has_inventory(name),
        })
        .collect();
    Ok(Json(DataResponse { data: environments }))
}

/// GET /api/v1/components
///
/// Registry entries grouped by platform tag.
pub async fn list_components(
    _caller: CallerIdentity,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let grouped: BTreeMap<String, Vec<ComponentSpec>> = state
        .manager
        .registry()
        .components_by_platform()
        .into_iter()
        .map(|(platform, specs)| (platform.to_string(), specs.into_iter().cloned().collect()))
        .collect();
    Ok(Json(DataResponse { data: grouped }))
}
