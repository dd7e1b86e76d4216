//! Relay WebSocket message types
//!
//! This module defines the event protocol spoken with the relay: the
//! inbound call events (setup, prompt, interrupt, dtmf, error) and the
//! outbound speech chunks and end-of-call directive. Field names follow
//! the relay's wire format verbatim.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::completion::SpeechChunk;

/// Maximum allowed size for a transcribed caller prompt (50 KB)
pub const MAX_PROMPT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a reported interruption prefix (50 KB)
pub const MAX_UTTERANCE_SIZE: usize = 50 * 1024;

// =============================================================================
// Inbound Events (Relay -> Server)
// =============================================================================

/// Inbound relay events for one call.
///
/// Unknown event types deserialize to [`InboundEvent::Unknown`] so the
/// coordinator can log and skip them without dropping the connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Call start: identifiers and relay-supplied attributes
    Setup(SetupEvent),

    /// One transcribed caller utterance
    Prompt {
        /// Transcribed text of what the caller said
        voice_prompt: String,
    },

    /// The caller barged in while the assistant was speaking
    Interrupt {
        /// The response prefix the caller is reported to have heard
        utterance_until_interrupt: String,
        /// How far into the response the caller was, in milliseconds
        duration_until_interrupt_ms: f64,
    },

    /// A single keypad press
    Dtmf {
        /// Keypad character ("0" through "9", "*", "#")
        digit: String,
    },

    /// Relay-reported fault; recorded on the session, never rethrown
    Error { description: String },

    /// Any event type this server does not recognize
    #[serde(other)]
    Unknown,
}

/// Payload of a setup event.
#[derive(Debug, Clone, Deserialize)]
pub struct SetupEvent {
    pub call_id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

// =============================================================================
// Outbound Events (Server -> Relay)
// =============================================================================

/// Outbound events to the relay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// One speakable chunk of the assistant response
    Text {
        /// Chunk text for speech synthesis
        token: String,
        /// True on the final chunk of a turn
        last: bool,
    },

    /// Directive to terminate the call
    End,
}

impl From<SpeechChunk> for OutboundEvent {
    fn from(chunk: SpeechChunk) -> Self {
        OutboundEvent::Text {
            token: chunk.text,
            last: chunk.last,
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Routing envelope consumed by the connection's sender task.
pub enum MessageRoute {
    /// JSON event to the relay
    Outgoing(OutboundEvent),
    /// Close the WebSocket connection
    Close,
}

impl From<SpeechChunk> for MessageRoute {
    fn from(chunk: SpeechChunk) -> Self {
        MessageRoute::Outgoing(chunk.into())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for inbound event validation failures
#[derive(Debug, Clone)]
pub enum EventValidationError {
    /// Prompt text exceeds the maximum allowed size
    PromptTooLarge { size: usize, max: usize },
    /// Interruption prefix exceeds the maximum allowed size
    UtteranceTooLarge { size: usize, max: usize },
}

impl std::fmt::Display for EventValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PromptTooLarge { size, max } => {
                write!(f, "Prompt too large: {} bytes (max: {} bytes)", size, max)
            }
            Self::UtteranceTooLarge { size, max } => {
                write!(
                    f,
                    "Interruption prefix too large: {} bytes (max: {} bytes)",
                    size, max
                )
            }
        }
    }
}

impl std::error::Error for EventValidationError {}

impl InboundEvent {
    /// Validates event field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), EventValidationError> {
        match self {
            InboundEvent::Prompt { voice_prompt } => {
                let size = voice_prompt.len();
                if size > MAX_PROMPT_SIZE {
                    return Err(EventValidationError::PromptTooLarge {
                        size,
                        max: MAX_PROMPT_SIZE,
                    });
                }
            }
            InboundEvent::Interrupt {
                utterance_until_interrupt,
                ..
            } => {
                let size = utterance_until_interrupt.len();
                if size > MAX_UTTERANCE_SIZE {
                    return Err(EventValidationError::UtteranceTooLarge {
                        size,
                        max: MAX_UTTERANCE_SIZE,
                    });
                }
            }
            // Other events carry no unbounded caller-provided content
            InboundEvent::Setup(_)
            | InboundEvent::Dtmf { .. }
            | InboundEvent::Error { .. }
            | InboundEvent::Unknown => {}
        }
        Ok(())
    }
}
