use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "Healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /readyz - Readiness probe
pub async fn readyz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
