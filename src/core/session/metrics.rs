//! Turn and session telemetry
//!
//! Every user prompt opens one [`TurnMetrics`] record that collects the
//! timestamps of the completion round trip. Time-to-first-token is the
//! single most latency-critical measurement in the system, so the stage
//! timestamps are captured individually rather than as derived durations.
//! All timestamps are epoch milliseconds and write-once: a stage that was
//! never reached stays `None`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::Session;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Telemetry for one user prompt to assistant response cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnMetrics {
    /// Epoch milliseconds at creation. Arrival order inside
    /// [`SessionMetrics::turns`] breaks ties between same-millisecond turns.
    pub turn_id: u64,
    pub prompt_received_at: Option<u64>,
    pub llm_request_started_at: Option<u64>,
    pub llm_first_token_at: Option<u64>,
    pub llm_complete_at: Option<u64>,
    pub first_chunk_sent_at: Option<u64>,
    /// Count of non-empty completion fragments received.
    pub total_tokens: u64,
    pub interrupted: bool,
    pub interrupted_at: Option<u64>,
    pub utterance_until_interrupt: Option<String>,
    pub duration_until_interrupt_ms: Option<u64>,
    pub error: Option<String>,
}

impl TurnMetrics {
    /// Open a new turn at the moment its prompt arrived.
    pub fn begin(at: u64) -> Self {
        Self {
            turn_id: at,
            prompt_received_at: Some(at),
            ..Self::default()
        }
    }

    // Stage marks only take effect the first time they are called; a
    // repeated mark would otherwise rewrite history after the fact.

    pub fn mark_request_started(&mut self, at: u64) {
        self.llm_request_started_at.get_or_insert(at);
    }

    pub fn mark_first_token(&mut self, at: u64) {
        self.llm_first_token_at.get_or_insert(at);
    }

    pub fn mark_first_chunk(&mut self, at: u64) {
        self.first_chunk_sent_at.get_or_insert(at);
    }

    pub fn mark_complete(&mut self, at: u64) {
        self.llm_complete_at.get_or_insert(at);
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    pub fn mark_interrupted(&mut self, at: u64, utterance: String, duration_ms: u64) {
        self.interrupted = true;
        self.interrupted_at.get_or_insert(at);
        if self.utterance_until_interrupt.is_none() {
            self.utterance_until_interrupt = Some(utterance);
        }
        self.duration_until_interrupt_ms.get_or_insert(duration_ms);
    }

    /// Time from issuing the completion request to the first fragment.
    pub fn ttft_ms(&self) -> Option<u64> {
        match (self.llm_request_started_at, self.llm_first_token_at) {
            (Some(start), Some(first)) => Some(first.saturating_sub(start)),
            _ => None,
        }
    }

    /// Time from prompt arrival to stream completion.
    pub fn turn_duration_ms(&self) -> Option<u64> {
        match (self.prompt_received_at, self.llm_complete_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    /// A turn is complete when its stream finished without error.
    pub fn is_completed(&self) -> bool {
        self.llm_complete_at.is_some() && self.error.is_none()
    }
}

/// Mutable aggregate telemetry for one session.
#[derive(Debug, Default, Serialize)]
pub struct SessionMetrics {
    /// Closed turns in arrival order.
    pub turns: Vec<TurnMetrics>,
    pub interruptions: u64,
    /// Relay-reported faults and completion failures, recorded not thrown.
    pub errors: Vec<String>,
}

impl SessionMetrics {
    pub fn record_turn(&mut self, turn: TurnMetrics) {
        self.turns.push(turn);
    }

    pub fn record_error(&mut self, description: impl Into<String>) {
        self.errors.push(description.into());
    }

    fn avg_ttft_ms(&self) -> Option<u64> {
        let samples: Vec<u64> = self.turns.iter().filter_map(TurnMetrics::ttft_ms).collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() / samples.len() as u64)
    }
}

/// Percentile latency statistics over a set of completed turns.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub avg: u64,
}

impl LatencyStats {
    /// Nearest-rank percentiles. Returns `None` when there are no samples.
    pub fn from_samples(mut samples: Vec<u64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let avg = samples.iter().sum::<u64>() / samples.len() as u64;
        Some(Self {
            p50: percentile(&samples, 50.0),
            p90: percentile(&samples, 90.0),
            p99: percentile(&samples, 99.0),
            avg,
        })
    }
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Aggregate emitted when a session is torn down.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub call_id: String,
    pub duration_ms: u64,
    pub turns: usize,
    pub completed_turns: usize,
    pub interruptions: u64,
    pub errors: usize,
    /// Time-to-first-token statistics over completed turns.
    pub ttft_ms: Option<LatencyStats>,
    /// Prompt-to-completion statistics over completed turns.
    pub turn_ms: Option<LatencyStats>,
}

impl SessionSummary {
    pub fn from_session(session: &Session, now: u64) -> Self {
        let metrics = &session.metrics;
        let completed: Vec<&TurnMetrics> =
            metrics.turns.iter().filter(|t| t.is_completed()).collect();
        Self {
            call_id: session.metadata.call_id.clone(),
            duration_ms: now.saturating_sub(session.metadata.started_at_ms),
            turns: metrics.turns.len(),
            completed_turns: completed.len(),
            interruptions: metrics.interruptions,
            errors: metrics.errors.len(),
            ttft_ms: LatencyStats::from_samples(
                completed.iter().filter_map(|t| t.ttft_ms()).collect(),
            ),
            turn_ms: LatencyStats::from_samples(
                completed.iter().filter_map(|t| t.turn_duration_ms()).collect(),
            ),
        }
    }
}

/// Live per-session view served by the metrics endpoint.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub duration_ms: u64,
    pub turns: usize,
    pub interruptions: u64,
    pub avg_ttft_ms: Option<u64>,
}

impl SessionSnapshot {
    pub fn from_session(session: &Session, now: u64) -> Self {
        Self {
            call_id: session.metadata.call_id.clone(),
            duration_ms: now.saturating_sub(session.metadata.started_at_ms),
            turns: session.metrics.turns.len(),
            interruptions: session.metrics.interruptions,
            avg_ttft_ms: session.metrics.avg_ttft_ms(),
        }
    }
}
