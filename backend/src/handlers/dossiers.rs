//! Client-facing dossier endpoints: progress, drafts and submissions.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::documents::upload_document;
use super::FieldValuesPayload;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::AppState;

pub fn dossier_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:dossier_id/template", get(get_workflow_template))
        .route("/:dossier_id/workflow", get(get_workflow_progress))
        .route("/:dossier_id/current-step", get(get_current_step))
        .route("/:dossier_id/steps/:step_id/draft", put(save_draft))
        .route("/:dossier_id/steps/:step_id/submit", post(submit_step))
        .route(
            "/:dossier_id/step-instances/:instance_id/resubmit",
            post(resubmit_step),
        )
        .route("/:dossier_id/documents", post(upload_document))
}

/// Steps, fields and document requirements of the dossier's product.
async fn get_workflow_template(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(dossier_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let dossier = state.engine.instances.load_dossier(&actor, dossier_id).await?;
    let template = state.engine.templates.workflow_template(dossier.product_id).await?;
    Ok(Json(template))
}

async fn get_workflow_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(dossier_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let progress = state.engine.instances.progress(&actor, dossier_id).await?;
    Ok(Json(progress))
}

/// The instance the dossier currently points at, or `null`.
async fn get_current_step(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(dossier_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let current = state.engine.instances.current(&actor, dossier_id).await?;
    Ok(Json(current))
}

async fn save_draft(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path((dossier_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<FieldValuesPayload>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .engine
        .submissions
        .save_draft(&actor, dossier_id, step_id, payload.fields)
        .await?;
    Ok(Json(result))
}

async fn submit_step(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path((dossier_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<FieldValuesPayload>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .engine
        .submissions
        .submit_step(&actor, dossier_id, step_id, payload.fields)
        .await?;
    Ok(Json(result))
}

async fn resubmit_step(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path((dossier_id, instance_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<FieldValuesPayload>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .engine
        .submissions
        .resubmit_step(&actor, dossier_id, instance_id, payload.fields)
        .await?;
    Ok(Json(result))
}
