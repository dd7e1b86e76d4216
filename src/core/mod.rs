pub mod completion;
pub mod session;

// Re-export commonly used types for convenience
pub use completion::{
    CompletionBackend, CompletionError, CompletionRequest, CompletionResult, CompletionStream,
    OpenAiCompletion, SpeechChunk, SpeechChunker, stream_completion_turn,
};

pub use session::{
    CallMetadata, InterruptOutcome, Message, Role, Session, SessionMetrics, SessionSnapshot,
    SessionStore, SessionStoreError, SessionSummary, SharedSession, TurnMetrics,
    apply_interruption, now_ms,
};
