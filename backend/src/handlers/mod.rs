use axum::{extract::State, http::StatusCode, response::Json};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;

pub mod documents;
pub mod dossiers;
pub mod fields;
pub mod step_instances;

pub use documents::document_routes;
pub use dossiers::dossier_routes;
pub use fields::field_routes;
pub use step_instances::step_instance_routes;

/// Field values keyed by template `field_key`.
#[derive(Debug, Default, Deserialize)]
pub struct FieldValuesPayload {
    #[serde(default)]
    pub fields: HashMap<String, JsonValue>,
}

/// Body of every reject/outdate endpoint. The engine applies the stricter
/// printable-length rule on top.
#[derive(Debug, Deserialize, Validate)]
pub struct ReasonPayload {
    #[validate(length(min = 1, max = 2000, message = "reason must be between 1 and 2000 characters"))]
    pub reason: String,
}

/// Liveness plus a store ping.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<JsonValue>) {
    match state.engine.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "healthy", "service": "dossierflow-api"})),
        ),
        Err(e) => {
            tracing::warn!("Health check store ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "service": "dossierflow-api"})),
            )
        }
    }
}
