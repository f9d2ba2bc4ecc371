//! OpenAI-compatible chat completions

use super::{merge_object, post_json, LlmProvider, ProviderError, ProviderKind};
use crate::prompt::CompiledPrompt;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

/// Chat-completions name for a generation-config key. `None` drops the key.
fn flat_key(key: &str) -> Option<&str> {
    match key {
        "maxOutputTokens" | "max_output_tokens" => Some("max_tokens"),
        "topP" => Some("top_p"),
        "stopSequences" | "stop_sequences" => Some("stop"),
        "candidateCount" | "candidate_count" => Some("n"),
        "presencePenalty" => Some("presence_penalty"),
        "frequencyPenalty" => Some("frequency_penalty"),
        "topK" | "top_k" | "responseMimeType" | "response_mime_type" => None,
        other => Some(other),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    /// Flat keys pass through; a nested `generationConfig` bucket is
    /// flattened underneath them (flat keys win on conflict).
    fn normalize_params(&self, params: &Map<String, Value>) -> Value {
        let mut out = Map::new();

        let nested = params
            .get("generationConfig")
            .or_else(|| params.get("generation_config"))
            .and_then(Value::as_object);
        if let Some(nested) = nested {
            for (key, value) in nested {
                if let Some(name) = flat_key(key) {
                    out.insert(name.to_string(), value.clone());
                }
            }
        }

        for (key, value) in params {
            if key == "generationConfig" || key == "generation_config" {
                continue;
            }
            if let Some(name) = flat_key(key) {
                out.insert(name.to_string(), value.clone());
            }
        }

        Value::Object(out)
    }

    fn build_request(&self, model: &str, prompt: &CompiledPrompt, params: Value) -> Value {
        let mut body = json!({});
        merge_object(&mut body, params);
        merge_object(
            &mut body,
            json!({
                "model": model,
                "messages": prompt.turns(),
            }),
        );
        body
    }

    async fn send(&self, _model: &str, request: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        post_json(self.http.post(&url).bearer_auth(&self.api_key), &request).await
    }

    fn extract_text(&self, envelope: &Value) -> Result<String, ProviderError> {
        let message = envelope.pointer("/choices/0/message").ok_or_else(|| {
            ProviderError::InvalidEnvelope("missing choices[0].message".to_string())
        })?;
        match message.get("content") {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(Value::Null) | None => Err(ProviderError::EmptyCompletion),
            Some(other) => Err(ProviderError::InvalidEnvelope(format!(
                "choices[0].message.content is not a string: {}",
                other
            ))),
        }
    }
}
