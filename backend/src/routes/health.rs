use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
}

/// Simple health check endpoint. Deliberately independent of the AI cache:
/// a missing key or book must not make the process look down.
pub async fn health_check() -> Json<HealthStatus> {
    tracing::debug!("Health check endpoint called");
    Json(HealthStatus {
        status: "healthy".to_string(),
    })
}
