//! Telemetry primitives for session-level observability.
//! By default, nothing is emitted unless a sink is installed via
//! `set_telemetry_sink`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::model::{StopReason, Usage};

/// Implement this to receive telemetry events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_session` may be called from any worker thread; avoid
///   panicking in implementations.
/// - Keep overhead minimal; `record_decode_failure` sits on the stream
///   hot path.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_session(&self, trace: SessionTrace);

    // Optional per-fragment event; default no-op so sinks that only care
    // about terminal outcomes stay trivial.
    fn record_decode_failure(&self, _failure: DecodeFailure) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid
// cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already
/// installed. This is a write-once global for the process lifetime.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
pub(crate) fn emit_session(trace: SessionTrace) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_session(trace);
    }
}

#[inline]
pub(crate) fn emit_decode_failure(failure: DecodeFailure) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_decode_failure(failure);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test
/// thread. Spawned threads in a test must call this as well if they
/// should emit.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}

/// Terminal record for one session: how it ended and what it cost.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionTrace {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    /// "completed" | "failed" | "cancelled"
    pub outcome: Option<String>,
    pub latency_ms: Option<u64>,

    pub tokens_prompt: Option<u32>,
    pub tokens_completion: Option<u32>,
    pub tokens_total: Option<u32>,

    pub stop_reason: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl SessionTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn model(mut self, v: &str) -> Self {
        self.model = Some(v.to_string());
        self
    }
    pub fn endpoint(mut self, v: &str) -> Self {
        self.endpoint = Some(v.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = Some(v);
        self
    }
    pub fn tokens(mut self, usage: Option<Usage>) -> Self {
        if let Some(u) = usage {
            self.tokens_prompt = Some(u.prompt_tokens);
            self.tokens_completion = Some(u.completion_tokens);
            self.tokens_total = Some(u.total_tokens);
        }
        self
    }
    pub fn stop_reason_opt(mut self, v: Option<StopReason>) -> Self {
        self.stop_reason = v.map(|r| format!("{r:?}"));
        self
    }
    pub fn error_kind(mut self, v: &str) -> Self {
        self.error_kind = Some(v.to_string());
        self
    }
    pub fn error_message(mut self, v: &str) -> Self {
        self.error_message = Some(v.to_string());
        self
    }
}

/// One malformed stream fragment that was dropped. The payload is
/// truncated so a flaky server cannot flood the sink.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeFailure {
    pub payload: String,
    pub error: String,
}

const PAYLOAD_SNIPPET_MAX: usize = 160;

impl DecodeFailure {
    pub fn new(payload: &str, error: &impl std::fmt::Display) -> Self {
        Self {
            payload: crate::http_client::truncate(payload, PAYLOAD_SNIPPET_MAX),
            error: error.to_string(),
        }
    }
}
