use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{
    AiClient, CachedContext, ChunkIterator, CreateCachedContextRequest, StreamMessageRequest,
};
use crate::errors::{AppError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Covers the cachedContents create call, which uploads the full book text.
const UNARY_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking client for the Gemini REST API: cached-content management plus
/// streaming generation.
///
/// Blocking on purpose — the chat bridge adapts this surface onto the async
/// runtime, so every method here runs on a `spawn_blocking` worker and the
/// HTTP clients are built inside the calling thread.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: Option<String>,
    api_base_url: String,
}

// --- Wire format (camelCase per the REST API) ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlock {
    parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Request body for the cachedContents create API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCachedContentBody {
    model: String,
    display_name: String,
    system_instruction: ContentBlock,
    // Always serialized, even empty: the prompt lives in systemInstruction.
    contents: Vec<ContentBlock>,
    ttl: String,
}

/// One cachedContents entry, as listed or echoed back on create.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedContentEntry {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    expire_time: Option<String>,
}

impl From<CachedContentEntry> for CachedContext {
    fn from(entry: CachedContentEntry) -> Self {
        Self {
            name: entry.name,
            display_name: entry.display_name.unwrap_or_default(),
            model: entry.model,
            expire_time: entry.expire_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCachedContentsResponse {
    #[serde(default)]
    cached_contents: Vec<CachedContentEntry>,
}

/// Request body for streamGenerateContent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    cached_content: String,
    contents: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// One SSE event payload from streamGenerateContent. Events carrying only
/// usage metadata or finish reasons have no candidate text.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamGenerateResponse {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamCandidate {
    #[serde(default)]
    content: Option<ContentBlock>,
}

impl StreamGenerateResponse {
    /// Concatenated text of the first candidate's parts, if any.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let mut text = String::new();
        for part in &content.parts {
            if let Some(part_text) = &part.text {
                text.push_str(part_text);
            }
        }
        if text.is_empty() { None } else { Some(text) }
    }
}

impl GeminiClient {
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self::new_with_base_url(
            api_key,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    #[must_use]
    pub const fn new_with_base_url(api_key: Option<String>, api_base_url: String) -> Self {
        Self {
            api_key,
            api_base_url,
        }
    }

    /// The configured API key, or `ConfigError` when unset. Checked per call
    /// so the process can start (and serve health checks) without one.
    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                AppError::ConfigError("GEMINI_API_KEY environment variable not set".to_string())
            })
    }

    fn unary_client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(UNARY_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpRequestError(format!("Failed to create HTTP client: {e}")))
    }

    fn streaming_client(&self) -> Result<reqwest::blocking::Client> {
        // No overall timeout: the stream stays open for the whole generation
        // and gaps between chunks can be long.
        reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| AppError::HttpRequestError(format!("Failed to create HTTP client: {e}")))
    }
}

impl AiClient for GeminiClient {
    fn list_cached_contexts(&self) -> Result<Vec<CachedContext>> {
        let key = self.key()?;
        let url = format!("{}/cachedContents?key={}", self.api_base_url, key);

        debug!("Listing cached contents");
        let response = self.unary_client()?.get(&url).send().map_err(|e| {
            error!("Failed to send cachedContents list request: {}", e);
            AppError::HttpRequestError(format!("Failed to list cached contents: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Gemini API returned error {}: {}", status, error_text);
            return Err(AppError::GeminiError(format!(
                "Gemini API returned error {status}: {error_text}"
            )));
        }

        let list: ListCachedContentsResponse = response.json().map_err(|e| {
            error!("Failed to parse cachedContents list response: {}", e);
            AppError::SerializationError(format!("Failed to parse cached contents list: {e}"))
        })?;

        debug!("Found {} cached contents", list.cached_contents.len());
        Ok(list
            .cached_contents
            .into_iter()
            .map(CachedContext::from)
            .collect())
    }

    fn create_cached_context(
        &self,
        request: &CreateCachedContextRequest,
    ) -> Result<CachedContext> {
        let key = self.key()?;
        let url = format!("{}/cachedContents?key={}", self.api_base_url, key);

        let body = CreateCachedContentBody {
            model: request.model.clone(),
            display_name: request.display_name.clone(),
            system_instruction: ContentBlock {
                parts: vec![Part {
                    text: Some(request.system_instruction.clone()),
                }],
                role: None,
            },
            contents: Vec::new(),
            ttl: format!("{}s", request.ttl.as_secs()),
        };

        debug!(
            display_name = %request.display_name,
            instruction_len = request.system_instruction.len(),
            "Creating cached content"
        );
        let response = self.unary_client()?.post(&url).json(&body).send().map_err(|e| {
            error!("Failed to send cachedContents create request: {}", e);
            AppError::HttpRequestError(format!("Failed to create cached content: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Gemini API returned error {}: {}", status, error_text);
            return Err(AppError::GeminiError(format!(
                "Gemini API returned error {status}: {error_text}"
            )));
        }

        let created: CachedContentEntry = response.json().map_err(|e| {
            error!("Failed to parse cachedContents create response: {}", e);
            AppError::SerializationError(format!("Failed to parse created cached content: {e}"))
        })?;

        Ok(created.into())
    }

    fn stream_message(&self, request: &StreamMessageRequest) -> Result<ChunkIterator> {
        let key = self.key()?;
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            self.api_base_url, request.handle.model, key
        );

        let body = GenerateContentRequest {
            cached_content: request.handle.cached_content.clone(),
            contents: request
                .turns
                .iter()
                .map(|turn| ContentBlock {
                    parts: vec![Part {
                        text: Some(turn.text.clone()),
                    }],
                    role: Some(turn.role.as_str().to_string()),
                })
                .collect(),
            generation_config: request
                .handle
                .temperature
                .map(|temperature| GenerationConfig {
                    temperature: Some(temperature),
                }),
        };

        debug!(
            model = %request.handle.model,
            turns = request.turns.len(),
            "Opening streaming generation request"
        );
        let response = self.streaming_client()?.post(&url).json(&body).send().map_err(|e| {
            error!("Failed to send streamGenerateContent request: {}", e);
            AppError::HttpRequestError(format!("Failed to open generation stream: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Gemini API returned error {}: {}", status, error_text);
            return Err(AppError::GeminiError(format!(
                "Gemini API returned error {status}: {error_text}"
            )));
        }

        Ok(Box::new(SseChunkIterator::new(BufReader::new(response))))
    }
}

/// Blocking iterator over the text chunks of a streamGenerateContent SSE
/// response. `next()` blocks on the socket between events; events without
/// candidate text (usage metadata, finish reasons) are skipped. After the
/// first error the iterator is finished.
struct SseChunkIterator<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> SseChunkIterator<R> {
    const fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    /// Reads one SSE event and returns its `data:` payload, or `None` at end
    /// of stream. Events are delimited by blank lines; multi-line data is
    /// joined with newlines.
    fn next_event(&mut self) -> Result<Option<String>> {
        let mut data = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).map_err(|e| {
                AppError::HttpRequestError(format!("Error reading response stream: {e}"))
            })?;
            if bytes_read == 0 {
                if data.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(data));
            }

            let field = line.trim_end_matches(['\r', '\n']);
            if field.is_empty() {
                if data.is_empty() {
                    continue;
                }
                return Ok(Some(data));
            }
            if let Some(value) = field.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
            // Other fields (event:, id:, comments) carry nothing we need.
        }
    }
}

impl<R: BufRead> Iterator for SseChunkIterator<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.next_event() {
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Ok(Some(payload)) => {
                    // OpenAI-compatible gateways terminate with an explicit
                    // marker; the upstream API just closes the stream.
                    if payload.trim() == "[DONE]" {
                        self.finished = true;
                        return None;
                    }
                    match serde_json::from_str::<StreamGenerateResponse>(&payload) {
                        Ok(event) => {
                            if let Some(text) = event.text() {
                                return Some(Ok(text));
                            }
                        }
                        Err(e) => {
                            self.finished = true;
                            return Some(Err(AppError::SerializationError(format!(
                                "Failed to parse stream chunk: {e}"
                            ))));
                        }
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
