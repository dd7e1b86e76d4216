//! Streaming completion backends
//!
//! This module defines the seam between the call coordinator and the remote
//! text-completion service: a backend turns a conversation into a stream of
//! content fragments, and the turn driver in [`streamer`] shapes those
//! fragments into speakable chunks while recording latency telemetry.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::core::session::Message;

pub mod chunker;
pub mod openai;
pub mod streamer;

pub use chunker::{DEFAULT_CHUNK_BOUNDARIES, DEFAULT_FLUSH_THRESHOLD, SpeechChunker};
pub use openai::OpenAiCompletion;
pub use streamer::{SpeechChunk, stream_completion_turn};

/// Errors that can occur while requesting or consuming a completion.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The request could not be issued or was rejected by the service
    #[error("Completion request failed: {0}")]
    RequestFailed(String),

    /// The stream broke while fragments were being consumed
    #[error("Completion stream error: {0}")]
    Stream(String),

    /// The service answered with a payload we could not interpret
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),

    /// Invalid backend configuration
    #[error("Invalid completion configuration: {0}")]
    InvalidConfiguration(String),
}

pub type CompletionResult<T> = Result<T, CompletionError>;

/// Stream of content fragments produced by one completion request.
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionResult<String>> + Send>>;

/// One streaming completion request built from a session's conversation.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Provider seam for streaming text completions.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issue one streaming completion request over the given conversation.
    async fn stream_chat(&self, request: CompletionRequest) -> CompletionResult<CompletionStream>;
}
