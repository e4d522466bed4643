use std::time::Duration;

use crate::errors::AppError;
use crate::models::chats::MessageRole;

pub mod gemini_client;

pub use gemini_client::GeminiClient;

// Type alias for one item pulled from the provider stream
pub type ChunkResult = Result<String, AppError>;
// Type alias for the provider stream itself. Each `next()` may block on
// network I/O, so it must only ever be driven from a worker thread.
pub type ChunkIterator = Box<dyn Iterator<Item = ChunkResult> + Send>;

/// Process-wide binding of a generation model to a cached prompt context.
///
/// Built once by the content cache manager and shared read-only across all
/// requests for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandle {
    /// Full model resource name, e.g. `models/gemini-3-flash-preview`.
    pub model: String,
    /// Provider-assigned cache name, e.g. `cachedContents/abc123`.
    pub cached_content: String,
    pub temperature: Option<f32>,
}

/// A provider-side cached prompt context, as listed or created.
#[derive(Debug, Clone)]
pub struct CachedContext {
    pub name: String,
    pub display_name: String,
    pub model: Option<String>,
    pub expire_time: Option<String>,
}

/// Parameters for creating a cached prompt context.
#[derive(Debug, Clone)]
pub struct CreateCachedContextRequest {
    pub model: String,
    pub display_name: String,
    pub system_instruction: String,
    pub ttl: Duration,
}

/// Role token in the provider's vocabulary. The provider has no "assistant"
/// role; assistant turns are replayed as `model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    User,
    Model,
}

impl ProviderRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl From<MessageRole> for ProviderRole {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => Self::User,
            MessageRole::Assistant => Self::Model,
        }
    }
}

/// One conversational turn, already in provider vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTurn {
    pub role: ProviderRole,
    pub text: String,
}

/// Everything needed for one streaming generation call: the model/cache
/// binding plus the full ordered conversation (history + new message).
#[derive(Debug, Clone)]
pub struct StreamMessageRequest {
    pub handle: ModelHandle,
    pub turns: Vec<ProviderTurn>,
}

/// Trait defining the interface to the generative-model provider.
///
/// Deliberately synchronous: the surface being wrapped is a blocking chunk
/// iterator, and every call site routes through `spawn_blocking`.
pub trait AiClient: Send + Sync {
    /// Lists the provider-side cached prompt contexts visible to this key.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing, the request fails, or
    /// the response cannot be parsed.
    fn list_cached_contexts(&self) -> Result<Vec<CachedContext>, AppError>;

    /// Creates a cached prompt context holding the full system instruction.
    /// Potentially large (entire book text); slow and infrequent.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing, the request fails, or
    /// the response cannot be parsed.
    fn create_cached_context(
        &self,
        request: &CreateCachedContextRequest,
    ) -> Result<CachedContext, AppError>;

    /// Opens a streaming generation call and returns the blocking chunk
    /// iterator over the model's incremental output.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the call cannot be
    /// opened; failures after the first chunk surface through the iterator.
    fn stream_message(&self, request: &StreamMessageRequest) -> Result<ChunkIterator, AppError>;
}
