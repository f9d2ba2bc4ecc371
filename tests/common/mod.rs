//! Shared fixtures for end-to-end labeling tests
//!
//! Builds a temp workspace holding a record document, a vocabulary and a
//! prompt template, and wires a [`Labeler`] to a scripted provider with
//! in-memory output and trace sinks.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use targetlabel::{
    Labeler, LabelerConfig, MemorySink, MemoryTraceSink, ProviderRegistry, PromptTemplate,
    ScriptedProvider, StaticPromptSource,
};
use tempfile::TempDir;

pub const PROMPT_NAME: &str = "target-categorization";

/// A record as it appears in the source document.
pub fn record(id: &str, label: &str, topics: &[&str]) -> Value {
    json!({
        "id": id,
        "label": label,
        "description": format!("{label} description"),
        "target_explanation": format!("{label} explanation."),
        "subject": "Biology",
        "topic": topics,
    })
}

/// Wrap records in the nested document shape the labeler reads by default.
pub fn document(records: Vec<Value>) -> Value {
    json!({
        "meta": {"generated": "2024-05-01", "tags": ["a", {"b": null}]},
        "data": {
            "search_results": {
                "total": records.len(),
                "targets": records,
            }
        }
    })
}

pub fn vocabulary() -> Value {
    json!([
        {"Topic": "Kinase", "Subject": "Biology", "Category": "Enzymes", "Terms": "phosphorylation"},
        {"Topic": "Receptor", "Subject": "Biology", "Category": "Signalling"},
        {"Topic": "Orbit", "Subject": "Physics", "Category": "Mechanics"},
    ])
}

pub fn template(provider: &str) -> PromptTemplate {
    PromptTemplate::from_yaml(
        &format!(
            "name: {PROMPT_NAME}\n\
             provider: {provider}\n\
             model: test-model\n\
             parameters:\n  temperature: 0.1\n\
             text: |\n  Label: {{{{label}}}}\n  Description: {{{{description}}}}\n  Explanation: {{{{explanation}}}}\n  Topics:\n  {{{{vocabulary}}}}\n"
        ),
        "fixture",
    )
    .expect("fixture template parses")
}

/// Temp files for one run plus the sinks the labeler writes to.
pub struct Fixture {
    pub dir: TempDir,
    pub config: LabelerConfig,
    pub output: Arc<MemorySink>,
    pub traces: Arc<MemoryTraceSink>,
}

impl Fixture {
    pub fn new(records: Vec<Value>) -> Self {
        Self::with_document(&document(records).to_string())
    }

    pub fn with_document(content: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("all_targets.json");
        let vocabulary = dir.path().join("vocabulary.json");
        std::fs::write(&input, content).expect("write records");
        std::fs::write(&vocabulary, vocabulary_json()).expect("write vocabulary");

        let config = LabelerConfig {
            input,
            vocabulary,
            output: dir.path().join("labeled_targets.json"),
            concurrency: 4,
            call_timeout_secs: 5,
            ..LabelerConfig::default()
        };

        Self {
            dir,
            config,
            output: Arc::new(MemorySink::new()),
            traces: Arc::new(MemoryTraceSink::new()),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// A labeler whose single OpenAI-kind provider is `provider`.
    pub fn labeler(&self, provider: Arc<ScriptedProvider>, template: PromptTemplate) -> Labeler {
        let registry = ProviderRegistry::new().with_provider(provider);
        Labeler::new(
            self.config.clone(),
            Arc::new(registry),
            Arc::new(StaticPromptSource::new(template)),
        )
        .with_output_sink(self.output.clone())
        .with_trace_sink(self.traces.clone())
    }
}

fn vocabulary_json() -> String {
    vocabulary().to_string()
}

/// A model answer ranking the given topics, wrapped in prose.
pub fn ranked_answer(topics: &[(&str, f64)]) -> String {
    let ranked: Vec<Value> = topics
        .iter()
        .map(|(topic, confidence)| json!({"Topic": topic, "Confidence": confidence}))
        .collect();
    format!(
        "Here is my classification:\n{}\nLet me know if you need more.",
        json!({"RankedTopics": ranked})
    )
}
