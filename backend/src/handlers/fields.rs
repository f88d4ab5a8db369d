use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::ReasonPayload;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FieldResubmitPayload {
    pub value: JsonValue,
}

pub fn field_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/approve", post(approve_field))
        .route("/:id/reject", post(reject_field))
        .route("/:id/resubmit", post(resubmit_field))
}

async fn approve_field(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let value = state.engine.fields.approve(&actor, id).await?;
    Ok(Json(value))
}

async fn reject_field(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonPayload>,
) -> ApiResult<impl IntoResponse> {
    payload.validate()?;
    let value = state.engine.fields.reject(&actor, id, &payload.reason).await?;
    Ok(Json(value))
}

async fn resubmit_field(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<FieldResubmitPayload>,
) -> ApiResult<impl IntoResponse> {
    let value = state.engine.fields.resubmit(&actor, id, payload.value).await?;
    Ok(Json(value))
}
