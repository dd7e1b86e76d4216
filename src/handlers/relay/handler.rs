//! Relay WebSocket handler
//!
//! This module is the session coordinator: it terminates one relay
//! connection per call, dispatches the call's inbound events in arrival
//! order, and owns the session's lifecycle from setup to teardown.
//!
//! Event ordering matters. A prompt suspends the loop while the completion
//! streams; an interrupt arriving meanwhile queues on the socket and is
//! applied the moment the in-flight turn resolves, against that turn's
//! recorded metrics and history. In-flight completions are never cancelled.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::completion::{CompletionRequest, SpeechChunker, stream_completion_turn};
use crate::core::session::{
    CallMetadata, InterruptOutcome, Message as ChatMessage, SessionStoreError, TurnMetrics,
    apply_interruption, now_ms,
};
use crate::middleware::MaybeClientIp;
use crate::state::AppState;

use super::messages::{InboundEvent, MessageRoute, OutboundEvent, SetupEvent};

/// Channel buffer size for outbound relay events
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (1 MB); the relay sends text events only
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the loop checks whether the connection went stale
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Keypad digit reserved as the caller's end-of-call request
const END_CALL_DIGIT: &str = "0";

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket carrying one call's event
/// stream.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    MaybeClientIp(client_ip): MaybeClientIp,
) -> Response {
    info!(?client_ip, "relay WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, client_ip))
}

/// Handle one relay connection from upgrade to teardown.
async fn handle_relay_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    client_ip: Option<std::net::IpAddr>,
) {
    // Correlates log records until setup supplies a call id.
    let connection_id = uuid::Uuid::new_v4();
    info!(%connection_id, "relay WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing events
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close);

            let result = match route {
                MessageRoute::Outgoing(event) => match serde_json::to_string(&event) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!("failed to serialize outbound relay event: {e}");
                        continue;
                    }
                },
                MessageRoute::Close => {
                    info!("closing relay WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                // The relay side may hang up at any time; buffered chunks
                // that can no longer be delivered are dropped.
                warn!("failed to send relay WebSocket message: {e}");
                break;
            }

            if should_close {
                break;
            }
        }
    });

    // The call this connection owns, set by a successful setup.
    let mut call_id: Option<String> = None;

    let idle_timeout = Duration::from_secs(app_state.config.idle_timeout_secs);
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        let continue_processing = process_relay_message(
                            msg,
                            &mut call_id,
                            &message_tx,
                            &app_state,
                        ).await;

                        if !continue_processing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%connection_id, "relay WebSocket error: {e}");
                        break;
                    }
                    None => {
                        info!(%connection_id, "relay WebSocket connection closed by relay");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        %connection_id,
                        "relay connection idle for {}s, closing stale call",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx.send(MessageRoute::Close).await;
                    break;
                }
                debug!(%connection_id, "relay connection idle check - still active");
            }
        }
    }

    // Cleanup
    sender_task.abort();

    if let Some(call_id) = call_id {
        teardown_session(&call_id, &app_state).await;
    }
    if let Some(ip) = client_ip {
        app_state.release_connection(ip);
    }

    info!(%connection_id, "relay WebSocket connection terminated");
}

/// Process one incoming WebSocket message.
///
/// Returns `false` when the connection should stop processing.
async fn process_relay_message(
    msg: Message,
    call_id: &mut Option<String>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    match msg {
        Message::Text(text) => {
            let event: InboundEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    // Malformed events are a relay bug, not a reason to
                    // drop the call.
                    warn!("ignoring malformed relay event: {e}");
                    return true;
                }
            };

            if let Err(e) = event.validate_size() {
                warn!("ignoring oversized relay event: {e}");
                return true;
            }

            handle_inbound_event(event, call_id, message_tx, app_state).await;
            true
        }
        Message::Binary(data) => {
            debug!("ignoring unexpected binary frame ({} bytes)", data.len());
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("relay WebSocket close received");
            false
        }
    }
}

/// Dispatch one typed relay event.
async fn handle_inbound_event(
    event: InboundEvent,
    call_id: &mut Option<String>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) {
    match event {
        InboundEvent::Setup(setup) => {
            handle_setup(setup, call_id, app_state);
        }
        InboundEvent::Prompt { voice_prompt } => {
            handle_prompt(voice_prompt, call_id.as_deref(), message_tx, app_state).await;
        }
        InboundEvent::Interrupt {
            utterance_until_interrupt,
            duration_until_interrupt_ms,
        } => {
            handle_interrupt(
                &utterance_until_interrupt,
                duration_until_interrupt_ms.round() as u64,
                call_id.as_deref(),
                app_state,
            )
            .await;
        }
        InboundEvent::Dtmf { digit } => {
            handle_dtmf(&digit, call_id.as_deref(), message_tx, app_state).await;
        }
        InboundEvent::Error { description } => {
            handle_relay_error(description, call_id.as_deref(), app_state).await;
        }
        InboundEvent::Unknown => {
            warn!(?call_id, "ignoring unknown relay event type");
        }
    }
}

/// Create the session for a new call.
fn handle_setup(setup: SetupEvent, call_id: &mut Option<String>, app_state: &Arc<AppState>) {
    if call_id.is_some() {
        warn!(
            existing = ?call_id,
            duplicate = %setup.call_id,
            "ignoring duplicate setup on an established connection"
        );
        return;
    }

    let metadata = CallMetadata {
        call_id: setup.call_id.clone(),
        from: setup.from,
        to: setup.to,
        direction: setup.direction,
        custom_parameters: setup.custom_parameters,
        started_at_ms: now_ms(),
    };

    match app_state
        .sessions
        .create(metadata, &app_state.config.system_instruction)
    {
        Ok(_) => {
            info!(call_id = %setup.call_id, "call session created");
            *call_id = Some(setup.call_id);
        }
        Err(SessionStoreError::AlreadyExists(id)) => {
            // The existing session keeps its history; this connection does
            // not adopt the call.
            warn!(call_id = %id, "ignoring setup for an already-known call");
        }
    }
}

/// Run one completion turn for a transcribed caller utterance.
async fn handle_prompt(
    voice_prompt: String,
    call_id: Option<&str>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) {
    let Some(call_id) = call_id else {
        warn!("dropping prompt received before setup");
        return;
    };
    let Some(session) = app_state.sessions.get(call_id) else {
        warn!(%call_id, "dropping prompt for unknown call");
        return;
    };

    let config = &app_state.config;
    let mut turn = TurnMetrics::begin(now_ms());

    // Short lock: append the user message and snapshot the prompt. The
    // completion await below runs without the session lock.
    let request = {
        let mut session = session.lock().await;
        session.conversation.push(ChatMessage::user(voice_prompt));
        CompletionRequest {
            messages: session.conversation.clone(),
            max_tokens: config.max_completion_tokens,
            temperature: config.temperature,
        }
    };

    let chunker = SpeechChunker::new(config.chunk_flush_threshold, &config.chunk_boundaries);
    let reply = stream_completion_turn(
        app_state.completion.as_ref(),
        request,
        chunker,
        &config.apology,
        &mut turn,
        message_tx,
    )
    .await;

    let mut session = session.lock().await;
    match reply {
        Some(text) => {
            debug!(
                %call_id,
                turn_id = turn.turn_id,
                tokens = turn.total_tokens,
                ttft_ms = ?turn.ttft_ms(),
                "completion turn finished"
            );
            session.conversation.push(ChatMessage::assistant(text));
        }
        None => {
            if let Some(error) = &turn.error {
                session.metrics.record_error(error.clone());
            }
            debug!(%call_id, turn_id = turn.turn_id, "completion turn ended without content");
        }
    }
    session.metrics.record_turn(turn);
}

/// Correct history and metrics after a caller barge-in.
async fn handle_interrupt(
    utterance: &str,
    duration_ms: u64,
    call_id: Option<&str>,
    app_state: &Arc<AppState>,
) {
    let Some(call_id) = call_id else {
        warn!("dropping interrupt received before setup");
        return;
    };
    let Some(session) = app_state.sessions.get(call_id) else {
        warn!(%call_id, "dropping interrupt for unknown call");
        return;
    };

    let mut session = session.lock().await;
    match apply_interruption(&mut session, utterance, duration_ms, now_ms()) {
        InterruptOutcome::Truncated {
            message_index,
            removed_after,
        } => {
            info!(
                %call_id,
                message_index,
                removed_after,
                duration_ms,
                "caller interruption applied"
            );
        }
        InterruptOutcome::NoMatch => {
            // Usually means the response had already been spoken in full.
            warn!(
                %call_id,
                utterance,
                "interruption prefix not found in history, conversation left unmodified"
            );
        }
    }
}

/// Handle a keypad press. Digit "0" is the end-of-call request; all other
/// digits are accepted but unhandled, as an extension point.
async fn handle_dtmf(
    digit: &str,
    call_id: Option<&str>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) {
    let Some(call_id) = call_id else {
        warn!("dropping dtmf received before setup");
        return;
    };

    if digit != END_CALL_DIGIT {
        debug!(%call_id, digit, "unhandled dtmf digit");
        return;
    }

    info!(%call_id, "caller requested end of call");
    let farewell = OutboundEvent::Text {
        token: app_state.config.farewell.clone(),
        last: true,
    };
    if message_tx
        .send(MessageRoute::Outgoing(farewell))
        .await
        .is_err()
    {
        warn!(%call_id, "outbound channel closed before farewell");
        return;
    }

    // Give the relay time to speak the farewell before tearing the call
    // down.
    tokio::time::sleep(Duration::from_millis(app_state.config.end_call_grace_ms)).await;
    if message_tx
        .send(MessageRoute::Outgoing(OutboundEvent::End))
        .await
        .is_err()
    {
        warn!(%call_id, "outbound channel closed before end directive");
    }
}

/// Record a relay-reported fault on the session.
async fn handle_relay_error(description: String, call_id: Option<&str>, app_state: &Arc<AppState>) {
    warn!(?call_id, %description, "relay reported an error");
    let Some(call_id) = call_id else {
        return;
    };
    if let Some(session) = app_state.sessions.get(call_id) {
        session.lock().await.metrics.record_error(description);
    }
}

/// Evict the session and emit its aggregate summary.
async fn teardown_session(call_id: &str, app_state: &Arc<AppState>) {
    let Some(session) = app_state.sessions.remove(call_id) else {
        return;
    };

    let session = session.lock().await;
    let summary = session.summary(now_ms());
    match serde_json::to_string(&summary) {
        Ok(json) => {
            info!(
                %call_id,
                duration_ms = summary.duration_ms,
                turns = summary.turns,
                interruptions = summary.interruptions,
                summary = %json,
                "call session closed"
            );
        }
        Err(e) => warn!(%call_id, "failed to serialize session summary: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::completion::{
        CompletionBackend, CompletionError, CompletionResult, CompletionStream,
    };
    use async_trait::async_trait;

    struct ScriptedBackend {
        fragments: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            _request: CompletionRequest,
        ) -> CompletionResult<CompletionStream> {
            let items: Vec<CompletionResult<String>> =
                self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl CompletionBackend for FailingBackend {
        async fn stream_chat(
            &self,
            _request: CompletionRequest,
        ) -> CompletionResult<CompletionStream> {
            Err(CompletionError::RequestFailed("boom".to_string()))
        }
    }

    fn test_state(backend: Arc<dyn CompletionBackend>) -> Arc<AppState> {
        let config = ServerConfig {
            completion_api_key: Some("test-key".to_string()),
            ..ServerConfig::default()
        };
        AppState::with_backend(config, backend)
    }

    fn setup_call(state: &Arc<AppState>, id: &str) -> Option<String> {
        let mut call_id = None;
        handle_setup(
            SetupEvent {
                call_id: id.to_string(),
                from: None,
                to: None,
                direction: None,
                custom_parameters: Default::default(),
            },
            &mut call_id,
            state,
        );
        call_id
    }

    #[tokio::test]
    async fn test_successful_turn_grows_conversation_by_two() {
        let state = test_state(Arc::new(ScriptedBackend {
            fragments: vec!["Hi there."],
        }));
        let call_id = setup_call(&state, "CA1").expect("setup");
        let (tx, _rx) = mpsc::channel(16);

        handle_prompt("hello".to_string(), Some(call_id.as_str()), &tx, &state).await;

        let session = state.sessions.get("CA1").expect("session");
        let session = session.lock().await;
        // system + user + assistant
        assert_eq!(session.conversation.len(), 3);
        assert_eq!(session.conversation[2].content, "Hi there.");
        assert_eq!(session.metrics.turns.len(), 1);
        assert!(session.metrics.turns[0].is_completed());
    }

    #[tokio::test]
    async fn test_failed_turn_grows_conversation_by_one() {
        let state = test_state(Arc::new(FailingBackend));
        let call_id = setup_call(&state, "CA1").expect("setup");
        let (tx, _rx) = mpsc::channel(16);

        handle_prompt("hello".to_string(), Some(call_id.as_str()), &tx, &state).await;

        let session = state.sessions.get("CA1").expect("session");
        let session = session.lock().await;
        // system + user; the assistant message is omitted on failure
        assert_eq!(session.conversation.len(), 2);
        assert!(session.metrics.turns[0].error.is_some());
        assert_eq!(session.metrics.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_for_unknown_call_mutates_nothing() {
        let state = test_state(Arc::new(FailingBackend));
        let (tx, _rx) = mpsc::channel(16);

        handle_prompt("hello".to_string(), Some("CA-unknown"), &tx, &state).await;

        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_setup_is_rejected() {
        let state = test_state(Arc::new(FailingBackend));
        assert!(setup_call(&state, "CA1").is_some());
        // The same call id arriving again is refused and the second
        // connection does not adopt the call.
        assert!(setup_call(&state, "CA1").is_none());
        assert_eq!(state.sessions.len(), 1);
    }
}
