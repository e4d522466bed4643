//! Mock clients and app spawning shared between unit and integration tests.
//! Compiled unconditionally so integration tests can use it through the
//! library crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use axum::Router;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::llm::{
    AiClient, CachedContext, ChunkIterator, ChunkResult, CreateCachedContextRequest, ModelHandle,
    StreamMessageRequest,
};
use crate::routes::app_router;
use crate::services::{BookSource, ContentCacheManager};
use crate::state::AppState;

/// Book text used by [`spawn_app`] unless a test overrides it.
pub const DEFAULT_TEST_BOOK: &str = "Kapitel 1: Haltung beginnt am Morgen. Steh auf.";

// --- Tracing Initialization for Tests ---

static TRACING_INIT: Once = Once::new();

// Helper function to ensure tracing is initialized (idempotent)
pub fn ensure_tracing_initialized() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .unwrap_or_else(|e| eprintln!("Failed to initialize tracing: {}", e));
    });
}

// --- Mock AI client ---

/// What the scripted chunk iterator does on each pull.
#[derive(Clone)]
enum ScriptedChunk {
    Item(Result<String>),
    Panic,
}

/// Scriptable stand-in for the provider client. Records every call so tests
/// can assert on cache reuse and on the exact turns sent for generation.
#[derive(Clone)]
pub struct MockAiClient {
    cached_contexts: Arc<Mutex<Vec<CachedContext>>>,
    list_failures: Arc<Mutex<VecDeque<AppError>>>,
    create_failures: Arc<Mutex<VecDeque<AppError>>>,
    stream_failures: Arc<Mutex<VecDeque<AppError>>>,
    scripted_chunks: Arc<Mutex<Vec<ScriptedChunk>>>,
    last_create_request: Arc<Mutex<Option<CreateCachedContextRequest>>>,
    last_created_name: Arc<Mutex<Option<String>>>,
    last_stream_request: Arc<Mutex<Option<StreamMessageRequest>>>,
    list_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    created_counter: Arc<AtomicUsize>,
    chunks_pulled: Arc<AtomicUsize>,
    iterator_retired_flag: Arc<AtomicBool>,
    iterator_retired_notify: Arc<Notify>,
}

impl MockAiClient {
    pub fn new() -> Self {
        Self {
            cached_contexts: Arc::new(Mutex::new(Vec::new())),
            list_failures: Arc::new(Mutex::new(VecDeque::new())),
            create_failures: Arc::new(Mutex::new(VecDeque::new())),
            stream_failures: Arc::new(Mutex::new(VecDeque::new())),
            scripted_chunks: Arc::new(Mutex::new(Vec::new())),
            last_create_request: Arc::new(Mutex::new(None)),
            last_created_name: Arc::new(Mutex::new(None)),
            last_stream_request: Arc::new(Mutex::new(None)),
            list_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
            created_counter: Arc::new(AtomicUsize::new(0)),
            chunks_pulled: Arc::new(AtomicUsize::new(0)),
            iterator_retired_flag: Arc::new(AtomicBool::new(false)),
            iterator_retired_notify: Arc::new(Notify::new()),
        }
    }

    /// Pre-populates the provider-side cache listing.
    pub fn seed_cached_context(&self, context: CachedContext) {
        self.cached_contexts.lock().unwrap().push(context);
    }

    /// The next `list_cached_contexts` call fails with `err`.
    pub fn fail_next_list(&self, err: AppError) {
        self.list_failures.lock().unwrap().push_back(err);
    }

    /// The next `create_cached_context` call fails with `err`.
    pub fn fail_next_create(&self, err: AppError) {
        self.create_failures.lock().unwrap().push_back(err);
    }

    /// The next `stream_message` call fails before yielding any chunk.
    pub fn fail_next_stream(&self, err: AppError) {
        self.stream_failures.lock().unwrap().push_back(err);
    }

    /// Scripts the chunk sequence every `stream_message` iterator replays.
    pub fn script_chunks(&self, chunks: Vec<Result<String>>) {
        *self.scripted_chunks.lock().unwrap() =
            chunks.into_iter().map(ScriptedChunk::Item).collect();
    }

    /// Like [`script_chunks`](Self::script_chunks), but the pull after the
    /// last chunk panics the reading thread.
    pub fn script_panic_after(&self, chunks: Vec<Result<String>>) {
        let mut scripted: Vec<ScriptedChunk> =
            chunks.into_iter().map(ScriptedChunk::Item).collect();
        scripted.push(ScriptedChunk::Panic);
        *self.scripted_chunks.lock().unwrap() = scripted;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_create_request(&self) -> Option<CreateCachedContextRequest> {
        self.last_create_request.lock().unwrap().clone()
    }

    /// Name assigned to the most recently created cache entry.
    pub fn last_created_name(&self) -> Option<String> {
        self.last_created_name.lock().unwrap().clone()
    }

    pub fn last_stream_request(&self) -> Option<StreamMessageRequest> {
        self.last_stream_request.lock().unwrap().clone()
    }

    /// Chunks pulled off scripted iterators so far, across all streams.
    pub fn chunks_pulled(&self) -> usize {
        self.chunks_pulled.load(Ordering::SeqCst)
    }

    /// Resolves once a scripted chunk iterator has been dropped, i.e. the
    /// stream worker let go of the provider connection.
    pub async fn iterator_retired(&self) {
        if self.iterator_retired_flag.load(Ordering::SeqCst) {
            return;
        }
        self.iterator_retired_notify.notified().await;
    }
}

impl Default for MockAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AiClient for MockAiClient {
    fn list_cached_contexts(&self) -> Result<Vec<CachedContext>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.cached_contexts.lock().unwrap().clone())
    }

    fn create_cached_context(&self, request: &CreateCachedContextRequest) -> Result<CachedContext> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_create_request.lock().unwrap() = Some(request.clone());
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.created_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let context = CachedContext {
            name: format!("cachedContents/mock-{n}"),
            display_name: request.display_name.clone(),
            model: Some(request.model.clone()),
            expire_time: None,
        };
        self.cached_contexts.lock().unwrap().push(context.clone());
        *self.last_created_name.lock().unwrap() = Some(context.name.clone());
        Ok(context)
    }

    fn stream_message(&self, request: &StreamMessageRequest) -> Result<ChunkIterator> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_stream_request.lock().unwrap() = Some(request.clone());
        if let Some(err) = self.stream_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let chunks = self.scripted_chunks.lock().unwrap().clone();
        Ok(Box::new(ScriptedChunkIterator {
            chunks: chunks.into_iter(),
            pulled: Arc::clone(&self.chunks_pulled),
            retired_flag: Arc::clone(&self.iterator_retired_flag),
            retired_notify: Arc::clone(&self.iterator_retired_notify),
        }))
    }
}

struct ScriptedChunkIterator {
    chunks: std::vec::IntoIter<ScriptedChunk>,
    pulled: Arc<AtomicUsize>,
    retired_flag: Arc<AtomicBool>,
    retired_notify: Arc<Notify>,
}

impl Iterator for ScriptedChunkIterator {
    type Item = ChunkResult;

    fn next(&mut self) -> Option<Self::Item> {
        let scripted = self.chunks.next()?;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        match scripted {
            ScriptedChunk::Item(result) => Some(result),
            ScriptedChunk::Panic => panic!("scripted panic while reading chunks"),
        }
    }
}

impl Drop for ScriptedChunkIterator {
    fn drop(&mut self) {
        self.retired_flag.store(true, Ordering::SeqCst);
        self.retired_notify.notify_one();
    }
}

// --- Mock book source ---

pub struct MockBookSource {
    content: Mutex<Result<String>>,
    read_calls: AtomicUsize,
}

impl MockBookSource {
    pub fn with_content(content: &str) -> Self {
        Self {
            content: Mutex::new(Ok(content.to_string())),
            read_calls: AtomicUsize::new(0),
        }
    }

    /// A source whose book cannot be read.
    pub fn failing() -> Self {
        Self {
            content: Mutex::new(Err(AppError::ContentUnavailable(
                "mock book unavailable".to_string(),
            ))),
            read_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_content(&self, content: &str) {
        *self.content.lock().unwrap() = Ok(content.to_string());
    }

    /// Makes subsequent reads fail, as if the book file vanished.
    pub fn make_unavailable(&self) {
        *self.content.lock().unwrap() = Err(AppError::ContentUnavailable(
            "mock book unavailable".to_string(),
        ));
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookSource for MockBookSource {
    async fn read_book(&self) -> Result<String> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.content.lock().unwrap().clone()
    }
}

// --- Common fixtures ---

/// A model handle as the cache manager would produce it, for tests that
/// exercise the chat layer directly.
pub fn test_model_handle() -> ModelHandle {
    ModelHandle {
        model: "models/gemini-3-flash-preview".to_string(),
        cached_content: "cachedContents/test".to_string(),
        temperature: None,
    }
}

/// Structure to hold the wired-up application under test.
#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub config: Arc<Config>,
    pub mock_ai_client: Arc<MockAiClient>,
    pub mock_book_source: Arc<MockBookSource>,
}

/// Builds the app against mock AI and book clients, with an API key set so
/// cache initialization succeeds.
pub fn spawn_app() -> TestApp {
    spawn_app_with_config(Config {
        gemini_api_key: Some("test-api-key".to_string()),
        ..Config::default()
    })
}

/// Builds the app with the given config; tests drive requests through
/// `TestApp::router` with `tower::ServiceExt::oneshot`.
pub fn spawn_app_with_config(config: Config) -> TestApp {
    ensure_tracing_initialized();

    let config = Arc::new(config);
    let mock_ai_client = Arc::new(MockAiClient::new());
    let mock_book_source = Arc::new(MockBookSource::with_content(DEFAULT_TEST_BOOK));

    let ai_client: Arc<dyn AiClient> = mock_ai_client.clone();
    let book_source: Arc<dyn BookSource> = mock_book_source.clone();
    let cache_manager = Arc::new(ContentCacheManager::new(
        Arc::clone(&config),
        Arc::clone(&ai_client),
        book_source,
    ));

    let state = AppState {
        config: Arc::clone(&config),
        ai_client,
        cache_manager,
    };

    TestApp {
        router: app_router(state),
        config,
        mock_ai_client,
        mock_book_source,
    }
}

// --- Helpers for reading response bodies ---

/// Reads the whole response body as UTF-8 text. SSE responses terminate in
/// this service, so reading to the end is safe.
pub async fn read_body_text(body: axum::body::Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(bytes.to_vec()).expect("Response body is not valid UTF-8")
}

/// Reads the whole response body and parses it as JSON.
pub async fn read_body_json(body: axum::body::Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).expect("Failed to parse JSON body")
}

/// Collects the `data:` payload of each SSE event in the body, in order.
/// Events are delimited by blank lines; multi-line data is joined with
/// newlines.
pub async fn collect_sse_data(body: axum::body::Body) -> Vec<String> {
    let text = read_body_text(body).await;

    let mut events = Vec::new();
    let mut current_data_lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            if !current_data_lines.is_empty() {
                events.push(current_data_lines.join("\n"));
                current_data_lines.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // id:, retry: and comment lines are not used by this service.
    }
    if !current_data_lines.is_empty() {
        events.push(current_data_lines.join("\n"));
    }
    events
}
