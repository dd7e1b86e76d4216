//! Barge-in handling
//!
//! When the caller starts talking over the assistant, the relay reports the
//! utterance prefix the caller actually heard and how long into the
//! response they were. Everything the caller did not hear must be removed
//! from the conversation history, otherwise later completions are built on
//! words that were never spoken.

use tracing::debug;

use super::{Role, Session};

/// Result of applying an interruption to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// An assistant message was truncated at the end of the heard prefix;
    /// `removed_after` later assistant messages were dropped.
    Truncated {
        message_index: usize,
        removed_after: usize,
    },
    /// The reported prefix was not found. The conversation is left as-is;
    /// this happens when the response had already been fully spoken or the
    /// relay's transcription of the prefix does not match the emitted text.
    NoMatch,
}

/// Apply a reported caller interruption to the session.
///
/// Always increments the interruption counter and marks the most recent
/// turn as interrupted. The history edit uses a last-match policy: the scan
/// walks the conversation from the end and the most recent assistant
/// message containing the prefix is taken as the interrupted one.
pub fn apply_interruption(
    session: &mut Session,
    utterance: &str,
    duration_ms: u64,
    at_ms: u64,
) -> InterruptOutcome {
    session.metrics.interruptions += 1;
    if let Some(turn) = session.metrics.turns.last_mut() {
        turn.mark_interrupted(at_ms, utterance.to_string(), duration_ms);
    }

    // An empty prefix is contained in every message and would truncate the
    // last assistant turn to nothing.
    if utterance.is_empty() {
        return InterruptOutcome::NoMatch;
    }

    let anchor = session
        .conversation
        .iter()
        .enumerate()
        .rev()
        .find(|(_, message)| {
            message.role == Role::Assistant && message.content.contains(utterance)
        })
        .map(|(index, _)| index);

    let Some(anchor) = anchor else {
        return InterruptOutcome::NoMatch;
    };

    let message = &mut session.conversation[anchor];
    if let Some(position) = message.content.find(utterance) {
        message.content.truncate(position + utterance.len());
    }

    // Assistant messages after the anchor were generated but never heard.
    let mut index = 0usize;
    let mut removed_after = 0usize;
    session.conversation.retain(|message| {
        let keep = index <= anchor || message.role != Role::Assistant;
        if !keep {
            removed_after += 1;
        }
        index += 1;
        keep
    });

    debug!(
        call_id = %session.metadata.call_id,
        message_index = anchor,
        removed_after,
        "conversation truncated after interruption"
    );

    InterruptOutcome::Truncated {
        message_index: anchor,
        removed_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{CallMetadata, Message, TurnMetrics};
    use std::collections::HashMap;

    fn session_with(messages: &[Message]) -> Session {
        let metadata = CallMetadata {
            call_id: "CA1".to_string(),
            from: None,
            to: None,
            direction: None,
            custom_parameters: HashMap::new(),
            started_at_ms: 0,
        };
        let mut session = Session::new(metadata, "sys");
        session.conversation.extend_from_slice(messages);
        session
    }

    #[test]
    fn test_truncates_at_end_of_heard_prefix() {
        let mut session = session_with(&[
            Message::user("hi"),
            Message::assistant("Sure, I can help you with that today."),
        ]);
        session.metrics.record_turn(TurnMetrics::begin(100));

        let outcome = apply_interruption(&mut session, "I can help", 420, 500);

        assert_eq!(
            outcome,
            InterruptOutcome::Truncated {
                message_index: 2,
                removed_after: 0
            }
        );
        assert_eq!(session.conversation[2].content, "Sure, I can help");
        assert_eq!(session.metrics.interruptions, 1);

        let turn = session.metrics.turns.last().unwrap();
        assert!(turn.interrupted);
        assert_eq!(turn.interrupted_at, Some(500));
        assert_eq!(turn.utterance_until_interrupt.as_deref(), Some("I can help"));
        assert_eq!(turn.duration_until_interrupt_ms, Some(420));
    }

    #[test]
    fn test_removes_unheard_assistant_messages_after_match() {
        let mut session = session_with(&[
            Message::user("hi"),
            Message::assistant("First answer, never finished."),
            Message::user("wait"),
            Message::assistant("Second answer the caller never heard."),
        ]);

        let outcome = apply_interruption(&mut session, "First answer", 100, 200);

        assert_eq!(
            outcome,
            InterruptOutcome::Truncated {
                message_index: 2,
                removed_after: 1
            }
        );
        // system, user, truncated assistant, user
        assert_eq!(session.conversation.len(), 4);
        assert_eq!(session.conversation[2].content, "First answer");
        assert_eq!(session.conversation[3].role, Role::User);
    }

    #[test]
    fn test_last_matching_assistant_message_wins() {
        let mut session = session_with(&[
            Message::assistant("Let me check that for you."),
            Message::assistant("Let me check that again."),
        ]);

        let outcome = apply_interruption(&mut session, "Let me check", 50, 60);

        assert_eq!(
            outcome,
            InterruptOutcome::Truncated {
                message_index: 2,
                removed_after: 0
            }
        );
        assert_eq!(session.conversation[1].content, "Let me check that for you.");
        assert_eq!(session.conversation[2].content, "Let me check");
    }

    #[test]
    fn test_no_match_leaves_conversation_unmodified() {
        let mut session = session_with(&[
            Message::user("hi"),
            Message::assistant("All done, anything else?"),
        ]);
        session.metrics.record_turn(TurnMetrics::begin(100));

        let outcome = apply_interruption(&mut session, "never said this", 10, 20);

        assert_eq!(outcome, InterruptOutcome::NoMatch);
        assert_eq!(session.conversation.len(), 3);
        assert_eq!(session.conversation[2].content, "All done, anything else?");
        // Metrics are updated even without a match.
        assert_eq!(session.metrics.interruptions, 1);
        assert!(session.metrics.turns.last().unwrap().interrupted);
    }

    #[test]
    fn test_empty_prefix_is_treated_as_no_match() {
        let mut session = session_with(&[Message::assistant("Something was said.")]);
        let outcome = apply_interruption(&mut session, "", 10, 20);
        assert_eq!(outcome, InterruptOutcome::NoMatch);
        assert_eq!(session.conversation[1].content, "Something was said.");
        assert_eq!(session.metrics.interruptions, 1);
    }

    #[test]
    fn test_interrupt_without_any_turns_only_counts() {
        let mut session = session_with(&[]);
        let outcome = apply_interruption(&mut session, "anything", 10, 20);
        assert_eq!(outcome, InterruptOutcome::NoMatch);
        assert_eq!(session.metrics.interruptions, 1);
    }
}
