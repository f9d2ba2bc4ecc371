//! LLM providers behind one call surface
//!
//! Each backend takes a different prompt shape, a different parameter
//! layout and answers in a different envelope. An [`LlmProvider`]
//! implementation owns those three translations; the [`ProviderRegistry`]
//! picks the implementation for a template's provider id and always hands
//! back plain text.
//!
//! Adding a backend means adding a [`ProviderKind`] variant and an
//! implementation, not another branch at the call site.

mod gemini;
mod mock;
mod openai;

pub use gemini::{GeminiProvider, DEFAULT_BASE_URL as GEMINI_BASE_URL};
pub use mock::ScriptedProvider;
pub use openai::{OpenAiProvider, DEFAULT_BASE_URL as OPENAI_BASE_URL};

use crate::config::ProvidersConfig;
use crate::prompt::CompiledPrompt;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a single provider call. None of them abort a run.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{0}' is not configured (no credential)")]
    NotConfigured(String),

    #[error("unsupported provider '{0}'")]
    Unsupported(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response envelope: {0}")]
    InvalidEnvelope(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("provider call failed: {0}")]
    Call(String),
}

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(ProviderError::Unsupported(s.to_string())),
        }
    }
}

/// One LLM backend.
///
/// Implementations must tolerate concurrent calls through a shared `&self`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Reshape caller parameters into this backend's layout.
    fn normalize_params(&self, params: &Map<String, Value>) -> Value;

    /// Build the request body from the prompt and normalized parameters.
    fn build_request(&self, model: &str, prompt: &CompiledPrompt, params: Value) -> Value;

    /// Transport: send the body, return the raw response envelope.
    async fn send(&self, model: &str, request: Value) -> Result<Value, ProviderError>;

    /// Pull the completion text out of the response envelope.
    fn extract_text(&self, envelope: &Value) -> Result<String, ProviderError>;
}

/// Merge an object's keys into a request body.
fn merge_object(body: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(source)) = (body, extra) {
        for (key, value) in source {
            target.insert(key, value);
        }
    }
}

/// POST a JSON body and decode the JSON answer, mapping non-2xx to `Status`.
async fn post_json(request: reqwest::RequestBuilder, body: &Value) -> Result<Value, ProviderError> {
    let resp = request.json(body).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

/// Provider clients for a process, built once and shared read-only.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own kind, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Build HTTP clients for every provider whose credential variable is set.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::new();

        match read_credential(&config.openai.api_key_env) {
            Some(key) => {
                registry = registry.with_provider(Arc::new(OpenAiProvider::new(
                    http.clone(),
                    &config.openai.base_url,
                    key,
                )));
            }
            None => debug!(var = %config.openai.api_key_env, "openai credential not set"),
        }

        match read_credential(&config.gemini.api_key_env) {
            Some(key) => {
                registry = registry.with_provider(Arc::new(GeminiProvider::new(
                    http,
                    &config.gemini.base_url,
                    key,
                )));
            }
            None => debug!(var = %config.gemini.api_key_env, "gemini credential not set"),
        }

        info!(configured = ?registry.configured(), "provider registry ready");
        registry
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Send one prompt to the provider named by `provider` and return its text.
    ///
    /// `params` is only read; each backend builds its own normalized copy.
    pub async fn invoke(
        &self,
        provider: &str,
        model: &str,
        prompt: &CompiledPrompt,
        params: &Map<String, Value>,
    ) -> Result<String, ProviderError> {
        let kind: ProviderKind = provider.parse()?;
        let client = self
            .providers
            .get(&kind)
            .ok_or_else(|| ProviderError::NotConfigured(kind.to_string()))?;

        let normalized = client.normalize_params(params);
        let request = client.build_request(model, prompt, normalized);
        let envelope = client.send(model, request).await?;
        let text = client.extract_text(&envelope)?;

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(text)
    }
}

fn read_credential(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
