//! Handlers for the `/deployments` resource.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rollout_core::job::DeploymentRequest;

use crate::error::AppResult;
use crate::middleware::caller::CallerIdentity;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/deployments
///
/// Validate the request and queue a deployment job owned by the caller.
/// Returns 201 with the queued job; execution continues in the background.
pub async fn create_deployment(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Json(mut request): Json<DeploymentRequest>,
) -> AppResult<impl IntoResponse> {
    request.owner = caller.id;
    let job = state.manager.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// POST /api/v1/deployments/validate
///
/// Check a request without creating a job. Always 200; the body reports
/// whether the request is valid, the resolved order and a time estimate.
pub async fn validate_deployment(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Json(mut request): Json<DeploymentRequest>,
) -> AppResult<impl IntoResponse> {
    request.owner = caller.id;
    let preview = state.manager.preview(&request);
    Ok(Json(DataResponse { data: preview }))
}
