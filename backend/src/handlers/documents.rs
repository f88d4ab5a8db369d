//! Document upload, download and review endpoints.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::ReasonPayload;
use crate::auth::AuthUser;
use crate::error::{ApiResult, AppError};
use crate::workflow::UploadRequest;
use crate::AppState;

pub fn document_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_document))
        .route("/:id/versions", get(list_versions))
        .route("/:id/versions/:version_id/content", get(download_version))
        .route("/:id/approve", post(approve_document))
        .route("/:id/reject", post(reject_document))
        .route("/:id/outdate", post(outdate_document))
}

fn invalid_uuid(field: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![format!("{} must be a UUID", field)]);
    AppError::ValidationError { details }
}

/// Multipart upload of a new document version.
///
/// Parts: `file` (required), `document_type_id` (required) and
/// `step_instance_id` (optional, scopes the document to an instance).
pub(super) async fn upload_document(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(dossier_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut document_type_id: Option<Uuid> = None;
    let mut step_instance_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
                file = Some((filename, content_type, bytes.to_vec()));
            }
            "document_type_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                document_type_id =
                    Some(Uuid::parse_str(value.trim()).map_err(|_| invalid_uuid("document_type_id"))?);
            }
            "step_instance_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if !value.trim().is_empty() {
                    step_instance_id = Some(
                        Uuid::parse_str(value.trim()).map_err(|_| invalid_uuid("step_instance_id"))?,
                    );
                }
            }
            _ => {}
        }
    }

    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::BadRequest("Missing 'file' part".to_string()))?;
    let document_type_id = document_type_id
        .ok_or_else(|| AppError::BadRequest("Missing 'document_type_id' part".to_string()))?;

    let uploaded = state
        .engine
        .documents
        .upload(
            &actor,
            UploadRequest {
                dossier_id,
                document_type_id,
                step_instance_id,
                filename,
                content_type,
                bytes,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let document = state.engine.documents.document(&actor, id).await?;
    Ok(Json(document))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let versions = state.engine.documents.versions(&actor, id).await?;
    Ok(Json(versions))
}

async fn download_version(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let (version, bytes) = state
        .engine
        .documents
        .content(&actor, id, version_id)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&version.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        version.original_filename.replace('"', "'")
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    Ok((headers, bytes))
}

async fn approve_document(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let document = state.engine.documents.approve(&actor, id).await?;
    Ok(Json(document))
}

async fn reject_document(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonPayload>,
) -> ApiResult<impl IntoResponse> {
    payload.validate()?;
    let document = state.engine.documents.reject(&actor, id, &payload.reason).await?;
    Ok(Json(document))
}

async fn outdate_document(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonPayload>,
) -> ApiResult<impl IntoResponse> {
    payload.validate()?;
    let document = state.engine.documents.outdate(&actor, id, &payload.reason).await?;
    Ok(Json(document))
}
