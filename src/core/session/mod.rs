//! Call session state
//!
//! One [`Session`] exists per active call. It owns the conversation history
//! that forms the completion prompt, the immutable call attributes supplied
//! by the relay at setup, and the per-turn latency telemetry. Sessions live
//! in the [`SessionStore`] and are handed out behind an async mutex so a
//! call's event handler can borrow one across its own awaits without
//! touching any other call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod interrupt;
pub mod metrics;
pub mod store;

pub use interrupt::{InterruptOutcome, apply_interruption};
pub use metrics::{
    LatencyStats, SessionMetrics, SessionSnapshot, SessionSummary, TurnMetrics, now_ms,
};
pub use store::{SessionStore, SessionStoreError, SharedSession};

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Call attributes fixed by the relay's setup event.
///
/// Immutable after session creation.
#[derive(Debug, Clone, Serialize)]
pub struct CallMetadata {
    /// Opaque call identifier assigned by the relay.
    pub call_id: String,
    /// Origin identifier (caller number or address), when supplied.
    pub from: Option<String>,
    /// Destination identifier, when supplied.
    pub to: Option<String>,
    /// Call direction as reported by the relay (e.g. "inbound").
    pub direction: Option<String>,
    /// Relay-supplied custom parameters, passed through verbatim.
    pub custom_parameters: HashMap<String, String>,
    /// Epoch milliseconds at session creation.
    pub started_at_ms: u64,
}

/// Per-call state: conversation history plus telemetry.
///
/// The first conversation entry is always the system instruction and is
/// never mutated after creation.
#[derive(Debug)]
pub struct Session {
    pub metadata: CallMetadata,
    pub conversation: Vec<Message>,
    pub metrics: SessionMetrics,
}

impl Session {
    pub fn new(metadata: CallMetadata, system_instruction: &str) -> Self {
        Self {
            metadata,
            conversation: vec![Message::system(system_instruction)],
            metrics: SessionMetrics::default(),
        }
    }

    /// Aggregate summary derived at teardown.
    pub fn summary(&self, now: u64) -> SessionSummary {
        SessionSummary::from_session(self, now)
    }

    /// Lightweight live view for the metrics endpoint.
    pub fn snapshot(&self, now: u64) -> SessionSnapshot {
        SessionSnapshot::from_session(self, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(call_id: &str) -> CallMetadata {
        CallMetadata {
            call_id: call_id.to_string(),
            from: Some("+15550100".to_string()),
            to: Some("+15550199".to_string()),
            direction: Some("inbound".to_string()),
            custom_parameters: HashMap::new(),
            started_at_ms: 1_000,
        }
    }

    #[test]
    fn test_new_session_starts_with_system_message() {
        let session = Session::new(metadata("CA123"), "Be helpful.");
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation[0].role, Role::System);
        assert_eq!(session.conversation[0].content, "Be helpful.");
        assert!(session.metrics.turns.is_empty());
        assert_eq!(session.metrics.interruptions, 0);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("a").role, Role::System);
        assert_eq!(Message::user("b").role, Role::User);
        assert_eq!(Message::assistant("c").role, Role::Assistant);
    }

    #[test]
    fn test_role_serialization_is_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).expect("serialize");
        assert!(json.contains(r#""role":"user""#));
    }
}
