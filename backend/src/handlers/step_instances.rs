//! Step instance review endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::ReasonPayload;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::AppState;

pub fn step_instance_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_step_instance))
        .route("/:id/review", post(start_review))
        .route("/:id/approve", post(approve_step_instance))
        .route("/:id/reject", post(reject_step_instance))
}

/// Instance with its field values and documents
async fn get_step_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let detail = state.engine.instances.detail(&actor, id).await?;
    Ok(Json(detail))
}

async fn start_review(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.engine.approvals.start_review(&actor, id).await?;
    Ok(Json(instance))
}

/// 200 when the instance is approved, 207 with the per-item report when a
/// bulk approval left items behind.
async fn approve_step_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let approval = state.engine.approvals.approve_step_instance(&actor, id).await?;
    let status = if approval.approved {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(approval)))
}

async fn reject_step_instance(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonPayload>,
) -> ApiResult<impl IntoResponse> {
    payload.validate()?;
    let instance = state
        .engine
        .approvals
        .reject_step_instance(&actor, id, &payload.reason)
        .await?;
    Ok(Json(instance))
}
