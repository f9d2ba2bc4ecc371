//! Controlled vocabulary of topics, subjects and categories
//!
//! The full index is always built from every entry in the source. A
//! subject filter only narrows what the prompt shows the model; lookups at
//! resolution time go through the full index, so a topic the prompt never
//! listed can still resolve.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a vocabulary source. All of them abort a run.
#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("cannot read vocabulary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed vocabulary {path}: {message}")]
    Parse { path: String, message: String },

    #[error("unsupported vocabulary format: {0} (expected .json, .yaml, .yml or .csv)")]
    UnsupportedFormat(String),

    #[error("vocabulary {0} contains no entries")]
    Empty(String),
}

/// One row of the vocabulary source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    #[serde(rename = "Topic", alias = "topic")]
    pub topic: String,
    #[serde(rename = "Subject", alias = "subject")]
    pub subject: String,
    #[serde(rename = "Category", alias = "category")]
    pub category: String,
    #[serde(rename = "Terms", alias = "terms", default)]
    pub terms: Option<String>,
}

impl VocabularyEntry {
    pub fn new(
        topic: impl Into<String>,
        subject: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subject: subject.into(),
            category: category.into(),
            terms: None,
        }
    }

    pub fn with_terms(mut self, terms: impl Into<String>) -> Self {
        self.terms = Some(terms.into());
        self
    }
}

/// The subject and category a topic belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicClass {
    pub subject: String,
    pub category: String,
}

/// Topic → (subject, category) over the whole source. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct VocabularyIndex {
    topics: HashMap<String, TopicClass>,
}

impl VocabularyIndex {
    /// Build the index; a repeated topic replaces the earlier entry.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a VocabularyEntry>) -> Self {
        let mut topics = HashMap::new();
        for entry in entries {
            let class = TopicClass {
                subject: entry.subject.clone(),
                category: entry.category.clone(),
            };
            if let Some(previous) = topics.insert(entry.topic.clone(), class) {
                debug!(
                    topic = %entry.topic,
                    previous_subject = %previous.subject,
                    previous_category = %previous.category,
                    "duplicate vocabulary topic overwritten"
                );
            }
        }
        Self { topics }
    }

    pub fn lookup(&self, topic: &str) -> Option<&TopicClass> {
        self.topics.get(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Distinct subjects across the index, sorted.
    pub fn subjects(&self) -> BTreeSet<&str> {
        self.topics.values().map(|c| c.subject.as_str()).collect()
    }
}

/// A topic as shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptTopic {
    pub topic: String,
    pub terms: Option<String>,
}

/// The ordered vocabulary subset injected into each prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptVocabulary {
    topics: Vec<PromptTopic>,
}

impl PromptVocabulary {
    /// Keep entries whose subject matches `subject_filter` case-insensitively.
    /// An empty filter keeps everything.
    pub fn from_entries(entries: &[VocabularyEntry], subject_filter: &HashSet<String>) -> Self {
        let wanted: HashSet<String> = subject_filter.iter().map(|s| s.to_lowercase()).collect();
        let topics = entries
            .iter()
            .filter(|e| wanted.is_empty() || wanted.contains(&e.subject.to_lowercase()))
            .map(|e| PromptTopic {
                topic: e.topic.clone(),
                terms: e.terms.clone().filter(|t| !t.trim().is_empty()),
            })
            .collect();
        Self { topics }
    }

    pub fn topics(&self) -> &[PromptTopic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Render as the `{{vocabulary}}` prompt input: one topic per line,
    /// search terms in parentheses when present.
    pub fn render(&self) -> String {
        self.topics
            .iter()
            .map(|t| match &t.terms {
                Some(terms) => format!("{} ({})", t.topic, terms.trim()),
                None => t.topic.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Both views produced by a load.
#[derive(Debug, Clone)]
pub struct LoadedVocabulary {
    pub index: VocabularyIndex,
    pub prompt: PromptVocabulary,
}

impl LoadedVocabulary {
    pub fn from_entries(entries: &[VocabularyEntry], subject_filter: &HashSet<String>) -> Self {
        Self {
            index: VocabularyIndex::from_entries(entries),
            prompt: PromptVocabulary::from_entries(entries, subject_filter),
        }
    }
}

/// Read the raw entries of a vocabulary file, in source order.
pub fn read_entries(path: &Path) -> Result<Vec<VocabularyEntry>, VocabularyError> {
    let shown = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if !matches!(extension.as_str(), "json" | "yaml" | "yml" | "csv") {
        return Err(VocabularyError::UnsupportedFormat(shown));
    }

    let content = std::fs::read_to_string(path).map_err(|source| VocabularyError::Io {
        path: shown.clone(),
        source,
    })?;

    let entries: Vec<VocabularyEntry> = match extension.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| VocabularyError::Parse {
            path: shown.clone(),
            message: e.to_string(),
        })?,
        "csv" => read_csv(&content).map_err(|e| VocabularyError::Parse {
            path: shown.clone(),
            message: e.to_string(),
        })?,
        _ => serde_yaml::from_str(&content).map_err(|e| VocabularyError::Parse {
            path: shown.clone(),
            message: e.to_string(),
        })?,
    };

    if entries.is_empty() {
        return Err(VocabularyError::Empty(shown));
    }
    Ok(entries)
}

/// A header row names the columns; an empty `Terms` cell reads as no terms.
fn read_csv(content: &str) -> Result<Vec<VocabularyEntry>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
        .deserialize()
        .collect()
}

/// Load a vocabulary file into the full index and the prompt subset.
pub fn load(
    path: &Path,
    subject_filter: &HashSet<String>,
) -> Result<LoadedVocabulary, VocabularyError> {
    let entries = read_entries(path)?;
    let loaded = LoadedVocabulary::from_entries(&entries, subject_filter);
    debug!(
        path = %path.display(),
        entries = entries.len(),
        indexed = loaded.index.len(),
        shown = loaded.prompt.len(),
        "vocabulary loaded"
    );
    Ok(loaded)
}
