use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::header::{self, HeaderName},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::Result;
use crate::models::chats::ChatStreamRequest;
use crate::services::{ZippelSseEvent, open_session, stream_assistant_reply};
use crate::state::AppState;

use super::health::health_check;

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/stream", post(chat_stream_handler))
        .route("/health", get(health_check))
}

/// POST /chat/stream - streams the assistant's reply as Server-Sent Events.
///
/// Failures before the stream is committed (missing key, unreadable book,
/// bad history) become plain JSON error responses. Once streaming has
/// started, a failure arrives in-band as a `{"error": ...}` event and the
/// `[DONE]` marker is withheld.
#[instrument(
    skip(state, request),
    fields(history_len = request.history.len(), session_id = ?request.session_id)
)]
async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Result<Response> {
    info!("Chat stream requested");

    let handle = state.cache_manager.ensure_model_handle().await?;
    let session = open_session(handle, &request.history)?;
    let events = stream_assistant_reply(Arc::clone(&state.ai_client), session, request.message);

    let sse_stream = events.map(|event| {
        let payload = match event {
            ZippelSseEvent::Content(text) => json!({ "text": text }).to_string(),
            ZippelSseEvent::Error(message) => json!({ "error": message }).to_string(),
            ZippelSseEvent::Done => "[DONE]".to_string(),
        };
        Ok::<Event, Infallible>(Event::default().data(payload))
    });

    // X-Accel-Buffering stops nginx-style proxies from buffering the stream.
    let response = (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_stream),
    )
        .into_response();
    Ok(response)
}
