//! Model output → topics, subjects and categories
//!
//! Models wrap their JSON in prose or code fences often enough that the
//! answer is located first: the first brace-balanced `{...}` span is taken
//! and everything around it ignored. Topics are then checked against the
//! full vocabulary index.

use crate::vocabulary::VocabularyIndex;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no JSON object found in model output: {preview}")]
    NoJsonFound { preview: String },

    #[error("malformed JSON in model output: {0}")]
    MalformedJson(String),
}

/// Keys holding `[{Topic, Confidence}, ...]`, best first.
const RANKED_KEYS: &[&str] = &["RankedTopics", "rankedTopics", "ranked_topics"];
/// Keys holding a plain topic list (or a single topic string).
const FLAT_KEYS: &[&str] = &["Topic", "Topics", "topic", "topics"];

/// What a model answer resolved to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Topic names as returned, in rank order, known or not.
    pub topics: Vec<String>,
    pub subjects: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    /// Confidence of the top-ranked topic.
    pub confidence: Option<f64>,
    /// Returned topics the vocabulary does not know.
    pub unknown_topics: Vec<String>,
}

/// Find the first brace-balanced `{...}` span, ignoring braces inside
/// JSON string literals. A `{` that never closes is skipped and the search
/// continues after it.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut from = 0;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }

        from = start + 1;
    }

    None
}

/// Resolve a raw model answer against the vocabulary index.
pub fn resolve(raw_output: &str, vocabulary: &VocabularyIndex) -> Result<Resolution, ResolveError> {
    let span = extract_json_span(raw_output).ok_or_else(|| ResolveError::NoJsonFound {
        preview: raw_output.chars().take(200).collect(),
    })?;
    let parsed: Value =
        serde_json::from_str(span).map_err(|e| ResolveError::MalformedJson(e.to_string()))?;

    let (topics, confidence) = read_topics(&parsed);

    let mut resolution = Resolution {
        confidence,
        ..Resolution::default()
    };
    for topic in topics {
        match vocabulary.lookup(&topic) {
            Some(class) => {
                resolution.subjects.insert(class.subject.clone());
                resolution.categories.insert(class.category.clone());
            }
            None => {
                warn!(topic = %topic, "model returned a topic outside the vocabulary");
                resolution.unknown_topics.push(topic.clone());
            }
        }
        resolution.topics.push(topic);
    }

    Ok(resolution)
}

/// Ranked list first, flat list as fallback. A missing list is empty.
fn read_topics(parsed: &Value) -> (Vec<String>, Option<f64>) {
    if let Some(ranked) = RANKED_KEYS
        .iter()
        .find_map(|k| parsed.get(*k))
        .and_then(Value::as_array)
    {
        let mut topics = Vec::with_capacity(ranked.len());
        let mut confidence = None;
        for (rank, entry) in ranked.iter().enumerate() {
            let (name, score) = match entry {
                Value::String(s) => (Some(s.as_str()), None),
                Value::Object(_) => (
                    entry
                        .get("Topic")
                        .or_else(|| entry.get("topic"))
                        .and_then(Value::as_str),
                    entry
                        .get("Confidence")
                        .or_else(|| entry.get("confidence"))
                        .and_then(Value::as_f64),
                ),
                _ => (None, None),
            };
            if rank == 0 {
                confidence = score;
            }
            if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                topics.push(name.to_string());
            }
        }
        return (topics, confidence);
    }

    let topics = match FLAT_KEYS.iter().find_map(|k| parsed.get(*k)) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    (topics, None)
}
