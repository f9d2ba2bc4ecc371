//! Per-record trace side channel
//!
//! Every processed record produces one [`RecordTrace`] carrying the compiled
//! input and the raw output or error. Sinks cannot fail a run: recording is
//! fire-and-forget.

use crate::prompt::CompiledPrompt;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, Level};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordTrace {
    pub trace_id: Uuid,
    pub run_id: Uuid,
    pub target_id: String,
    pub model: String,
    pub input: CompiledPrompt,
    pub output: Option<String>,
    pub error: Option<String>,
    pub status: TraceStatus,
    #[serde(with = "millis")]
    pub latency: Duration,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

pub trait TraceSink: Send + Sync {
    fn record(&self, trace: RecordTrace);
}

/// Drops every trace.
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record(&self, _trace: RecordTrace) {}
}

/// Emits each trace as a structured `tracing` event. The info event carries
/// only the input's length; the full compiled input goes out at debug.
pub struct LogTraceSink;

const TRACE_TARGET: &str = "targetlabel::trace";

impl TraceSink for LogTraceSink {
    fn record(&self, trace: RecordTrace) {
        info!(
            target: TRACE_TARGET,
            trace_id = %trace.trace_id,
            run_id = %trace.run_id,
            target_id = %trace.target_id,
            model = %trace.model,
            status = ?trace.status,
            latency_ms = trace.latency.as_millis() as u64,
            input_chars = trace.input.flatten().chars().count(),
            output = trace.output.as_deref().unwrap_or_default(),
            error = trace.error.as_deref().unwrap_or_default(),
            "record trace"
        );
        if tracing::enabled!(target: TRACE_TARGET, Level::DEBUG) {
            let input = serde_json::to_string(&trace.input).unwrap_or_default();
            debug!(
                target: TRACE_TARGET,
                trace_id = %trace.trace_id,
                target_id = %trace.target_id,
                input = %input,
                "record trace input"
            );
        }
    }
}

/// Keeps traces in memory.
#[derive(Default)]
pub struct MemoryTraceSink {
    traces: Mutex<Vec<RecordTrace>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<RecordTrace> {
        self.traces.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.traces.lock().map(|t| t.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, trace: RecordTrace) {
        if let Ok(mut traces) = self.traces.lock() {
            traces.push(trace);
        }
    }
}
