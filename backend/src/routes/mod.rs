pub mod chat;
pub mod health;

use axum::{
    Json, Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::Config;
use crate::state::AppState;

/// Assembles the application router: service metadata at the root, the chat
/// API under `/chat`, and the CORS policy from config.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/", get(service_info))
        .nest("/chat", chat::chat_routes())
        .layer(cors)
        .with_state(state)
}

/// GET / - service metadata for anyone poking at the API root.
async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "ZippelGPT AI Service",
        "endpoints": {
            "chat": "/chat/stream",
            "health": "/chat/health",
        }
    }))
}

/// Browser clients live on a known set of origins; everything else fails the
/// preflight. Credentials stay enabled, which rules out a wildcard origin.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}
