use std::sync::Arc;

use crate::config::Config;
use crate::llm::AiClient;
use crate::services::ContentCacheManager;

// --- Shared application state ---
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ai_client: Arc<dyn AiClient>,
    pub cache_manager: Arc<ContentCacheManager>,
}
