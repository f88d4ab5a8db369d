use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, Response, StatusCode},
    middleware::Next,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assigns a request id (reusing an inbound `x-request-id`), echoes it on the
/// response and logs method, path, status and latency.
pub async fn request_context(request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if status >= 500 {
        tracing::error!(request_id = %request_id, method = %method, path = %normalize_path(&path), status, latency_ms, "Request failed");
    } else if status >= 400 {
        tracing::warn!(request_id = %request_id, method = %method, path = %normalize_path(&path), status, latency_ms, "Request rejected");
    } else {
        tracing::info!(request_id = %request_id, method = %method, path = %normalize_path(&path), status, latency_ms, "Request completed");
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Normalize path to group similar endpoints (e.g., /api/v1/dossiers/123 -> /api/v1/dossiers/:id)
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|s| if Uuid::parse_str(s).is_ok() { ":id" } else { s })
        .collect::<Vec<_>>()
        .join("/")
}

/// Health check endpoint with detailed status
pub async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> Result<axum::Json<HealthCheckResponse>, (StatusCode, axum::Json<HealthCheckResponse>)> {
    let started = Instant::now();

    let store_status = match state.engine.store().ping().await {
        Ok(()) => ServiceStatus {
            status: "healthy".to_string(),
            response_time_ms: Some(started.elapsed().as_millis() as i32),
            details: None,
        },
        Err(e) => ServiceStatus {
            status: "unhealthy".to_string(),
            response_time_ms: Some(started.elapsed().as_millis() as i32),
            details: Some(serde_json::json!({ "error": e.to_string() })),
        },
    };

    let healthy = store_status.status == "healthy";
    let response = HealthCheckResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: vec![("store".to_string(), store_status)]
            .into_iter()
            .collect(),
    };

    if healthy {
        Ok(axum::Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, axum::Json(response)))
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub services: std::collections::HashMap<String, ServiceStatus>,
}

#[derive(Debug, serde::Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: Option<i32>,
    pub details: Option<serde_json::Value>,
}
