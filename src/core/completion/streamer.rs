//! Turn driver for streaming completions
//!
//! Runs one conversation turn against a [`CompletionBackend`]: issues the
//! streaming request, shapes fragments into speakable chunks through the
//! [`SpeechChunker`], forwards chunks to the call's outbound channel, and
//! records every latency stage on the turn's metrics.
//!
//! A completion failure is a recovered, local event: the error is recorded
//! on the turn, the caller hears a short apology, and the call goes on.

use tokio::sync::mpsc;
use tracing::warn;

use super::chunker::SpeechChunker;
use super::{CompletionBackend, CompletionRequest};
use crate::core::session::metrics::{TurnMetrics, now_ms};

/// One speakable chunk bound for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechChunk {
    pub text: String,
    pub last: bool,
}

/// Drive one streaming completion turn.
///
/// Returns the concatenated response text for appending to the
/// conversation history, or `None` when the request failed or produced no
/// content. Chunk delivery failures are logged and swallowed; the relay
/// side of the channel may legitimately be gone already.
pub async fn stream_completion_turn<T>(
    backend: &dyn CompletionBackend,
    request: CompletionRequest,
    mut chunker: SpeechChunker,
    apology: &str,
    metrics: &mut TurnMetrics,
    outbound: &mpsc::Sender<T>,
) -> Option<String>
where
    T: From<SpeechChunk> + Send,
{
    metrics.mark_request_started(now_ms());

    let mut stream = match backend.stream_chat(request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("completion request failed: {e}");
            metrics.record_error(e.to_string());
            send_chunk(outbound, apology.to_string(), true, metrics).await;
            return None;
        }
    };

    let mut response = String::new();

    use futures::StreamExt;
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if fragment.is_empty() {
                    continue;
                }
                metrics.mark_first_token(now_ms());
                metrics.total_tokens += 1;
                response.push_str(&fragment);
                if let Some(chunk) = chunker.push(&fragment) {
                    send_chunk(outbound, chunk, false, metrics).await;
                }
            }
            Err(e) => {
                warn!("completion stream failed mid-turn: {e}");
                metrics.record_error(e.to_string());
                send_chunk(outbound, apology.to_string(), true, metrics).await;
                return None;
            }
        }
    }

    // The tail always goes out tagged last, even when it is empty, so the
    // relay can detect end-of-turn.
    send_chunk(outbound, chunker.finish(), true, metrics).await;
    metrics.mark_complete(now_ms());

    if response.is_empty() {
        None
    } else {
        Some(response)
    }
}

async fn send_chunk<T>(
    outbound: &mpsc::Sender<T>,
    text: String,
    last: bool,
    metrics: &mut TurnMetrics,
) where
    T: From<SpeechChunk> + Send,
{
    metrics.mark_first_chunk(now_ms());
    if outbound
        .send(T::from(SpeechChunk { text, last }))
        .await
        .is_err()
    {
        warn!("outbound channel closed, dropping completion chunk");
    }
}
