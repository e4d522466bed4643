use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::llm::{AiClient, CachedContext, CreateCachedContextRequest, ModelHandle};
use crate::services::book_source::BookSource;

/// Display name the provider-side book cache is registered under. Reuse is
/// keyed on this, so restarts and replicas share one cache entry.
pub const BOOK_CACHE_DISPLAY_NAME: &str = "zippel-book-cache";

/// Provider-side lifetime of the cached book context. Once it expires the
/// next initialization creates a fresh entry.
pub const BOOK_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(2 * 60 * 60);

/// Persona instruction the book text is appended to. The combined string is
/// stored provider-side as the cached system instruction, never sent per
/// request.
pub const SYSTEM_PROMPT: &str = r#"Du bist Christian Zippel.
Du bist ein Mentor, ein Philosoph des Körpers und ein High-Performance-Berater.
Du bist kein passiver Assistent; du bist ein aktiver, strategischer Wegweiser.

Deine Mission:
Berate den Nutzer in seinem Leben, decke die wahren Ursachen seiner Probleme auf und führe ihn mithilfe des bereitgestellten Buches auf den Weg der Exzellenz und Haltung.

Deine Fähigkeiten & Methodik:
1. **Brainstorming & Entdeckung (Discovery):** Engagiere dich aktiv, um herauszufinden, was die *tatsächlichen* Probleme des Nutzers sind. Gib dich nicht mit oberflächlichem Jammern zufrieden. Grabe tief. Stelle bohrende Fragen.
2. **Strategie & Umsetzung:** Erstelle konkrete, langfristige Strategien und handlungsorientierte Entscheidungen. Dein Ziel ist es, den Nutzer auf Kurs zu halten und nachhaltige Verbesserungen sicherzustellen.
3. **Bildung & Lehre:** Bilde den Nutzer aus. Nutze spezifische Konzepte, Geschichten, Vorlesungen und Weisheiten aus dem Buch, um zu erklären, *warum* er auf eine bestimmte Weise handeln muss.
4. **Motivation vs. Realitätscheck:** Du musst einschätzen, was der Nutzer in diesem Moment braucht:
   - Wenn er schwach ist, sich beschwert oder verblendet ist, gib ihm einen direkten, harten Realitätscheck, um ihn aufzuwecken.
   - Wenn er kämpft, aber strebt, gib ihm kraftvolle Motivation ("Willenskraft").

Stütze deinen Rat immer auf den Inhalt des Buches.
Tonfall: Autoritär, kultiviert, philosophisch, aber zutiefst praxisnah. Kein Geschwafel.

---

Das folgende ist der Inhalt des Buches, auf dessen Grundlage du beraten sollst:

"#;

/// Owns the provider-side cached book context and the model handle bound to
/// it.
///
/// Initialization is lazy: nothing talks to the provider until the first
/// chat request calls [`ensure_model_handle`](Self::ensure_model_handle), so
/// the process starts and serves health checks even when the API key or the
/// book is missing. A failed initialization leaves the cell unset and is
/// retried on the next request.
pub struct ContentCacheManager {
    config: Arc<Config>,
    client: Arc<dyn AiClient>,
    book_source: Arc<dyn BookSource>,
    handle: OnceCell<ModelHandle>,
}

impl ContentCacheManager {
    pub fn new(
        config: Arc<Config>,
        client: Arc<dyn AiClient>,
        book_source: Arc<dyn BookSource>,
    ) -> Self {
        Self {
            config,
            client,
            book_source,
            handle: OnceCell::new(),
        }
    }

    /// Returns the model handle, initializing the cached book context on
    /// first use. Concurrent callers share one initialization; once it
    /// succeeds the provider is never consulted again for the lifetime of
    /// this manager.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no API key is configured,
    /// `ContentUnavailable` when the book cannot be read, and
    /// `CacheInitError` when the provider rejects the cache listing or
    /// creation.
    pub async fn ensure_model_handle(&self) -> Result<ModelHandle> {
        self.handle
            .get_or_try_init(|| self.initialize())
            .await
            .cloned()
    }

    #[instrument(skip(self), err)]
    async fn initialize(&self) -> Result<ModelHandle> {
        let has_key = self
            .config
            .gemini_api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty());
        if !has_key {
            return Err(AppError::ConfigError(
                "GEMINI_API_KEY environment variable not set".to_string(),
            ));
        }

        let book_content = self.book_source.read_book().await?;

        let client = Arc::clone(&self.client);
        let existing = tokio::task::spawn_blocking(move || client.list_cached_contexts())
            .await
            .map_err(|e| {
                AppError::InternalServerError(format!("Cache listing task failed: {e}"))
            })?
            .map_err(as_cache_init_failure)?;

        if let Some(context) = existing
            .into_iter()
            .find(|context| context.display_name == BOOK_CACHE_DISPLAY_NAME)
        {
            info!(cache_name = %context.name, "Found existing cache");
            return Ok(self.handle_from_context(context));
        }

        info!("Creating new cache for book content");
        let request = CreateCachedContextRequest {
            model: self.config.chat_model.clone(),
            display_name: BOOK_CACHE_DISPLAY_NAME.to_string(),
            // The book rides in the system instruction; the cache itself
            // holds no conversation turns.
            system_instruction: format!("{SYSTEM_PROMPT}{book_content}"),
            ttl: BOOK_CACHE_TTL,
        };
        let client = Arc::clone(&self.client);
        let created = tokio::task::spawn_blocking(move || client.create_cached_context(&request))
            .await
            .map_err(|e| {
                AppError::InternalServerError(format!("Cache creation task failed: {e}"))
            })?
            .map_err(as_cache_init_failure)?;

        info!(cache_name = %created.name, "Cache created");
        Ok(self.handle_from_context(created))
    }

    /// Binds the generation model to a cache entry. The provider records
    /// which model a cache was created for, so the entry's model wins over
    /// the configured one when present.
    fn handle_from_context(&self, context: CachedContext) -> ModelHandle {
        ModelHandle {
            model: context
                .model
                .unwrap_or_else(|| self.config.chat_model.clone()),
            cached_content: context.name,
            temperature: self.config.generation_temperature,
        }
    }
}

/// Provider failures during initialization surface as `CacheInitError`;
/// a missing key stays a `ConfigError` so the response masks it correctly.
fn as_cache_init_failure(err: AppError) -> AppError {
    match err {
        AppError::ConfigError(_) => err,
        other => AppError::CacheInitError(other.to_string()),
    }
}
