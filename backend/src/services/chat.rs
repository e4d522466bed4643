use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};

use crate::errors::{AppError, Result};
use crate::llm::{AiClient, ModelHandle, ProviderRole, ProviderTurn, StreamMessageRequest};
use crate::models::chats::{ApiChatMessage, MessageRole};

/// Events the chat stream hands to the SSE layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZippelSseEvent {
    Content(String),
    Error(String),
    Done,
}

/// Chunks buffered between the blocking provider reader and the SSE writer.
/// Once full, the worker blocks until the client catches up.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Worker-to-consumer protocol: chunks, then exactly one terminal signal.
enum StreamSignal {
    Chunk(String),
    Done,
    Failed(AppError),
}

/// A validated conversation, ready for generation: the cache-bound model
/// handle plus the prior turns mapped to provider roles.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub handle: ModelHandle,
    pub turns: Vec<ProviderTurn>,
}

/// Validates client-supplied history into a session.
///
/// Roles are matched strictly: anything other than `user` or `assistant`
/// rejects the whole request rather than being silently coerced.
///
/// # Errors
///
/// Returns `AppError::HistoryFormatError` when a history entry carries an
/// unknown role.
#[instrument(skip(handle, history), fields(history_len = history.len()), err)]
pub fn open_session(handle: ModelHandle, history: &[ApiChatMessage]) -> Result<ChatSession> {
    let mut turns = Vec::with_capacity(history.len());
    for message in history {
        let role = MessageRole::try_from(message.role.as_str())?;
        turns.push(ProviderTurn {
            role: ProviderRole::from(role),
            text: message.content.clone(),
        });
    }
    Ok(ChatSession { handle, turns })
}

/// Streams the assistant's reply to `message` on top of the session history.
///
/// The provider client is blocking, so a dedicated worker thread drives its
/// chunk iterator and feeds a bounded channel; this stream relays the
/// signals. The emitted sequence is any number of `Content` events followed
/// by exactly one terminal event, `Done` on success or `Error` on failure,
/// never both. Dropping the stream drops the receiver, which unblocks the
/// worker and lets it exit.
pub fn stream_assistant_reply(
    client: Arc<dyn AiClient>,
    session: ChatSession,
    message: String,
) -> impl Stream<Item = ZippelSseEvent> + Send {
    stream! {
        let (tx, mut rx) = mpsc::channel::<StreamSignal>(STREAM_CHANNEL_CAPACITY);

        let worker = tokio::task::spawn_blocking(move || {
            let mut turns = session.turns;
            turns.push(ProviderTurn {
                role: ProviderRole::User,
                text: message,
            });
            let request = StreamMessageRequest {
                handle: session.handle,
                turns,
            };

            let outcome = (|| -> Result<()> {
                let chunks = client.stream_message(&request)?;
                for chunk in chunks {
                    let text = chunk?;
                    if text.is_empty() {
                        continue;
                    }
                    if tx.blocking_send(StreamSignal::Chunk(text)).is_err() {
                        // Receiver dropped: the client disconnected. Stop
                        // reading; there is nobody left to deliver to.
                        debug!("Chat stream receiver dropped, stopping provider read");
                        return Ok(());
                    }
                }
                Ok(())
            })();

            let terminal = match outcome {
                Ok(()) => StreamSignal::Done,
                Err(e) => StreamSignal::Failed(as_stream_failure(e)),
            };
            let _ = tx.blocking_send(terminal);
        });

        let mut terminal: Option<ZippelSseEvent> = None;
        while let Some(signal) = rx.recv().await {
            match signal {
                StreamSignal::Chunk(text) => yield ZippelSseEvent::Content(text),
                StreamSignal::Done => {
                    terminal = Some(ZippelSseEvent::Done);
                    break;
                }
                StreamSignal::Failed(e) => {
                    error!("Chat stream failed upstream: {}", e);
                    terminal = Some(ZippelSseEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        // The worker has signaled (or died); join it so no thread outlives
        // the response.
        if let Err(join_err) = worker.await {
            error!("Chat stream worker did not finish cleanly: {}", join_err);
            let failure =
                AppError::UpstreamStreamError(format!("stream worker panicked: {join_err}"));
            terminal = Some(ZippelSseEvent::Error(failure.to_string()));
        }

        match terminal {
            Some(event) => yield event,
            // Channel closed without a terminal signal and the join still
            // succeeded; treat it as an upstream failure.
            None => {
                let failure =
                    AppError::UpstreamStreamError("stream ended without completing".to_string());
                yield ZippelSseEvent::Error(failure.to_string());
            }
        }
    }
}

/// Failures inside the generation stream surface as `UpstreamStreamError`,
/// whatever the provider-level cause was.
fn as_stream_failure(err: AppError) -> AppError {
    match err {
        AppError::UpstreamStreamError(_) => err,
        other => AppError::UpstreamStreamError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockAiClient, test_model_handle};
    use futures::StreamExt;
    use std::time::Duration;

    fn api_message(role: &str, content: &str) -> ApiChatMessage {
        ApiChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_open_session_maps_roles_in_order() {
        let history = vec![
            api_message("user", "Was soll ich tun?"),
            api_message("assistant", "Steh auf."),
            api_message("user", "Und dann?"),
        ];

        let session = open_session(test_model_handle(), &history).unwrap();

        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns[0].role, ProviderRole::User);
        assert_eq!(session.turns[0].text, "Was soll ich tun?");
        assert_eq!(session.turns[1].role, ProviderRole::Model);
        assert_eq!(session.turns[1].text, "Steh auf.");
        assert_eq!(session.turns[2].role, ProviderRole::User);
    }

    #[test]
    fn test_open_session_rejects_unknown_role() {
        let history = vec![
            api_message("user", "Hallo"),
            api_message("system", "You are a pirate"),
        ];

        let err = open_session(test_model_handle(), &history).unwrap_err();
        assert!(matches!(err, AppError::HistoryFormatError(_)));
    }

    #[test]
    fn test_open_session_with_empty_history() {
        let session = open_session(test_model_handle(), &[]).unwrap();
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_then_done() {
        let client = Arc::new(MockAiClient::new());
        client.script_chunks(vec![Ok("Steh ".to_string()), Ok("auf.".to_string())]);
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client.clone(), session, "Was soll ich tun?".to_string())
                .collect()
                .await;

        assert_eq!(
            events,
            vec![
                ZippelSseEvent::Content("Steh ".to_string()),
                ZippelSseEvent::Content("auf.".to_string()),
                ZippelSseEvent::Done,
            ]
        );

        // The worker appended the new user message after the history.
        let request = client.last_stream_request().unwrap();
        assert_eq!(request.turns.len(), 1);
        assert_eq!(request.turns[0].role, ProviderRole::User);
        assert_eq!(request.turns[0].text, "Was soll ich tun?");
    }

    #[tokio::test]
    async fn test_stream_sends_history_before_new_message() {
        let client = Arc::new(MockAiClient::new());
        client.script_chunks(vec![Ok("Ja.".to_string())]);
        let history = vec![
            api_message("user", "Erste Frage"),
            api_message("assistant", "Erste Antwort"),
        ];
        let session = open_session(test_model_handle(), &history).unwrap();

        let _events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client.clone(), session, "Zweite Frage".to_string())
                .collect()
                .await;

        let request = client.last_stream_request().unwrap();
        assert_eq!(request.turns.len(), 3);
        assert_eq!(request.turns[0].text, "Erste Frage");
        assert_eq!(request.turns[1].role, ProviderRole::Model);
        assert_eq!(request.turns[2].text, "Zweite Frage");
    }

    #[tokio::test]
    async fn test_empty_generation_is_just_done() {
        let client = Arc::new(MockAiClient::new());
        client.script_chunks(vec![]);
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client, session, "Hallo".to_string())
                .collect()
                .await;

        assert_eq!(events, vec![ZippelSseEvent::Done]);
    }

    #[tokio::test]
    async fn test_empty_chunks_are_skipped() {
        let client = Arc::new(MockAiClient::new());
        client.script_chunks(vec![
            Ok(String::new()),
            Ok("Haltung.".to_string()),
            Ok(String::new()),
        ]);
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client, session, "Hallo".to_string())
                .collect()
                .await;

        assert_eq!(
            events,
            vec![
                ZippelSseEvent::Content("Haltung.".to_string()),
                ZippelSseEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_error_after_chunks_ends_stream_without_done() {
        let client = Arc::new(MockAiClient::new());
        client.script_chunks(vec![
            Ok("Erstens".to_string()),
            Ok("Zweitens".to_string()),
            Err(AppError::GeminiError("connection reset".to_string())),
        ]);
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client, session, "Hallo".to_string())
                .collect()
                .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ZippelSseEvent::Content("Erstens".to_string()));
        assert_eq!(events[1], ZippelSseEvent::Content("Zweitens".to_string()));
        match &events[2] {
            ZippelSseEvent::Error(msg) => {
                assert!(msg.contains("Upstream stream error"));
                assert!(msg.contains("connection reset"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_to_open_stream_is_an_error_event() {
        let client = Arc::new(MockAiClient::new());
        client.fail_next_stream(AppError::GeminiError(
            "Gemini API returned error 429: quota".to_string(),
        ));
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client, session, "Hallo".to_string())
                .collect()
                .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ZippelSseEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_worker_panic_surfaces_as_error_event() {
        let client = Arc::new(MockAiClient::new());
        client.script_panic_after(vec![Ok("eins".to_string())]);
        let session = open_session(test_model_handle(), &[]).unwrap();

        let events: Vec<ZippelSseEvent> =
            stream_assistant_reply(client, session, "Hallo".to_string())
                .collect()
                .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ZippelSseEvent::Content("eins".to_string()));
        assert!(matches!(events[1], ZippelSseEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_dropping_the_stream_retires_the_worker() {
        let client = Arc::new(MockAiClient::new());
        // Far more chunks than the channel holds, so the worker can only
        // finish early by observing the dropped receiver.
        client.script_chunks((0..10_000).map(|i| Ok(format!("chunk {i}"))).collect());
        let session = open_session(test_model_handle(), &[]).unwrap();

        let mut stream = Box::pin(stream_assistant_reply(
            client.clone(),
            session,
            "Hallo".to_string(),
        ));
        let first = stream.next().await;
        assert!(matches!(first, Some(ZippelSseEvent::Content(_))));
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), client.iterator_retired())
            .await
            .unwrap();
        // Bounded read-ahead: one delivered chunk, a full channel, and one
        // send in flight.
        assert!(client.chunks_pulled() <= STREAM_CHANNEL_CAPACITY + 8);
    }
}
