//! Google Gemini `generateContent`

use super::{merge_object, post_json, LlmProvider, ProviderError, ProviderKind};
use crate::prompt::CompiledPrompt;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

/// `generationConfig` name for a flat parameter, if it belongs there.
fn generation_key(key: &str) -> Option<&'static str> {
    match key {
        "temperature" => Some("temperature"),
        "max_tokens" | "max_output_tokens" | "maxOutputTokens" => Some("maxOutputTokens"),
        "top_p" | "topP" => Some("topP"),
        "top_k" | "topK" => Some("topK"),
        "stop" | "stop_sequences" | "stopSequences" => Some("stopSequences"),
        "response_mime_type" | "responseMimeType" => Some("responseMimeType"),
        "candidate_count" | "candidateCount" => Some("candidateCount"),
        "presence_penalty" | "presencePenalty" => Some("presencePenalty"),
        "frequency_penalty" | "frequencyPenalty" => Some("frequencyPenalty"),
        "seed" => Some("seed"),
        _ => None,
    }
}

fn generation_value(name: &str, value: &Value) -> Value {
    match (name, value) {
        ("stopSequences", Value::String(s)) => json!([s]),
        _ => value.clone(),
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    /// Flat generation keys collapse into `generationConfig`; an explicit
    /// nested bucket is merged on top. Everything else passes through.
    fn normalize_params(&self, params: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        let mut generation = Map::new();

        for (key, value) in params {
            if key == "generationConfig" || key == "generation_config" {
                continue;
            }
            match generation_key(key) {
                Some(name) => {
                    generation.insert(name.to_string(), generation_value(name, value));
                }
                None => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }

        let nested = params
            .get("generationConfig")
            .or_else(|| params.get("generation_config"))
            .and_then(Value::as_object);
        if let Some(nested) = nested {
            for (key, value) in nested {
                let name = generation_key(key).unwrap_or(key.as_str());
                generation.insert(name.to_string(), generation_value(name, value));
            }
        }

        if !generation.is_empty() {
            out.insert("generationConfig".to_string(), Value::Object(generation));
        }
        Value::Object(out)
    }

    /// Gemini gets the whole prompt as one flattened user turn.
    fn build_request(&self, _model: &str, prompt: &CompiledPrompt, params: Value) -> Value {
        let mut body = params;
        if !body.is_object() {
            body = json!({});
        }
        merge_object(
            &mut body,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [{"text": prompt.flatten()}],
                }],
            }),
        );
        body
    }

    async fn send(&self, model: &str, request: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        post_json(
            self.http.post(&url).header("x-goog-api-key", &self.api_key),
            &request,
        )
        .await
    }

    /// Concatenate the text parts of the first candidate.
    fn extract_text(&self, envelope: &Value) -> Result<String, ProviderError> {
        let Some(candidate) = envelope.pointer("/candidates/0") else {
            if let Some(reason) = envelope
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
            {
                return Err(ProviderError::InvalidEnvelope(format!(
                    "prompt blocked: {}",
                    reason
                )));
            }
            return Err(ProviderError::InvalidEnvelope(
                "missing candidates[0]".to_string(),
            ));
        };

        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .ok_or(ProviderError::EmptyCompletion)?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        Ok(text)
    }
}
