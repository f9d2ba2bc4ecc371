//! Scripted provider for tests and dry runs: returns canned completions.

use super::{LlmProvider, ProviderError, ProviderKind};
use crate::prompt::CompiledPrompt;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A canned answer: completion text or a call failure message.
type Reply = Result<String, String>;

/// Answers by matching substrings of the flattened prompt.
///
/// Rules are checked in registration order; the first whose needle occurs
/// in the prompt wins, otherwise the default reply is used. Tracks call
/// counts and the peak number of calls in flight.
pub struct ScriptedProvider {
    kind: ProviderKind,
    rules: Vec<(String, Reply)>,
    default: Reply,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Registers as an OpenAI provider and fails every call until configured.
    pub fn new() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            rules: Vec::new(),
            default: Err("no scripted reply".to_string()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Register under another provider kind.
    pub fn as_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Default completion text.
    pub fn respond(mut self, text: impl Into<String>) -> Self {
        self.default = Ok(text.into());
        self
    }

    /// Completion text for prompts containing `needle`.
    pub fn respond_when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(text.into())));
        self
    }

    /// Call failure for prompts containing `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Err(message.into())));
        self
    }

    /// Simulated network latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, flattened, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn reply_for(&self, prompt: &str) -> Reply {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Counts one call in flight until dropped, so a call abandoned by a
/// timeout or cancellation still leaves the count.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    now: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, now }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn normalize_params(&self, params: &Map<String, Value>) -> Value {
        Value::Object(params.clone())
    }

    fn build_request(&self, model: &str, prompt: &CompiledPrompt, params: Value) -> Value {
        json!({
            "model": model,
            "prompt": prompt.flatten(),
            "parameters": params,
        })
    }

    async fn send(&self, _model: &str, request: Value) -> Result<Value, ProviderError> {
        let prompt = request["prompt"].as_str().unwrap_or_default().to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        let guard = InFlight::enter(&self.in_flight);
        self.peak_in_flight.fetch_max(guard.now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        drop(guard);

        match self.reply_for(&prompt) {
            Ok(text) => Ok(json!({ "text": text })),
            Err(message) => Err(ProviderError::Call(message)),
        }
    }

    fn extract_text(&self, envelope: &Value) -> Result<String, ProviderError> {
        envelope["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidEnvelope("missing text".to_string()))
    }
}
