use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

// Use modules from the library crate
use zippelgpt_backend::config::Config;
use zippelgpt_backend::llm::{AiClient, GeminiClient};
use zippelgpt_backend::logging::init_subscriber;
use zippelgpt_backend::routes::app_router;
use zippelgpt_backend::services::ContentCacheManager;
use zippelgpt_backend::services::book_source::{BookSource, FileBookSource, HttpBookSource};
use zippelgpt_backend::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_subscriber();

    info!("Starting ZippelGPT backend server...");

    let config = Arc::new(Config::load()?);

    let ai_client: Arc<dyn AiClient> = Arc::new(GeminiClient::new_with_base_url(
        config.gemini_api_key.clone(),
        config.gemini_api_base_url.clone(),
    ));
    let book_source: Arc<dyn BookSource> = match &config.book_url {
        Some(url) => Arc::new(HttpBookSource::new(url.clone())),
        None => Arc::new(FileBookSource::new(&config.book_path)),
    };
    let cache_manager = Arc::new(ContentCacheManager::new(
        Arc::clone(&config),
        Arc::clone(&ai_client),
        book_source,
    ));

    // Warm the cache up front. Not fatal on failure: the first chat request
    // retries initialization and health stays up either way.
    match cache_manager.ensure_model_handle().await {
        Ok(handle) => info!(model = %handle.model, "AI content cache ready"),
        Err(e) => warn!("Failed to initialize AI content cache: {}", e),
    }

    let state = AppState {
        config: Arc::clone(&config),
        ai_client,
        cache_manager,
    };

    let app = app_router(state).layer(
        TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
