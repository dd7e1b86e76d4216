//! Sentence-boundary fragment buffering
//!
//! Completion services emit fragments of a few characters at a time.
//! Dispatching each fragment to the relay individually produces choppy
//! speech synthesis, so fragments are buffered and released at natural
//! prosodic breaks: once the buffered text contains a sentence-ending
//! punctuation mark, or grows past a length threshold.
//!
//! A chunk can only be tagged as the last one once the stream has actually
//! ended, so the buffer is held until the *next* fragment proves more text
//! is coming. In the common case the final sentence then rides in the
//! `last`-tagged chunk instead of being followed by an empty trailer.

/// Default buffered-length threshold before a flush is forced.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 15;

/// Default punctuation marks treated as sentence boundaries.
pub const DEFAULT_CHUNK_BOUNDARIES: &str = ".!?,";

/// Accumulates completion fragments and releases speakable chunks.
#[derive(Debug)]
pub struct SpeechChunker {
    buffer: String,
    flush_threshold: usize,
    boundaries: String,
}

impl SpeechChunker {
    pub fn new(flush_threshold: usize, boundaries: &str) -> Self {
        Self {
            buffer: String::new(),
            flush_threshold,
            boundaries: boundaries.to_string(),
        }
    }

    /// Feed one fragment. Returns a chunk ready to send, if the previously
    /// buffered text had reached a boundary or the length threshold.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        let flushed = if !self.buffer.is_empty() && self.pending_ready() {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        };
        self.buffer.push_str(fragment);
        flushed
    }

    /// End of stream: whatever is buffered becomes the final chunk. Empty
    /// when the stream produced no text at all.
    pub fn finish(self) -> String {
        self.buffer
    }

    fn pending_ready(&self) -> bool {
        self.buffer.chars().any(|c| self.boundaries.contains(c))
            || self.buffer.chars().count() > self.flush_threshold
    }
}

impl Default for SpeechChunker {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_THRESHOLD, DEFAULT_CHUNK_BOUNDARIES)
    }
}
