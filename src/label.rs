//! Per-record labeling outcome

use crate::record::SimplifiedRecord;
use crate::resolve::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Placeholder label written in every classification field of a failed record.
pub const ERROR_PROCESSING: &str = "Error processing";

/// Confidence reported for a failed record.
pub const FAILURE_CONFIDENCE: f64 = -1.0;

/// One record's labels, success or failure-shaped. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingResult {
    #[serde(flatten)]
    pub record: SimplifiedRecord,
    #[serde(rename = "Subject")]
    pub subject: BTreeSet<String>,
    #[serde(rename = "Category")]
    pub category: BTreeSet<String>,
    #[serde(rename = "Topic")]
    pub topic: Vec<String>,
    #[serde(rename = "Confidence", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set only by [`Self::failure`]; the written output does not carry it.
    #[serde(skip)]
    failed: bool,
}

impl LabelingResult {
    pub fn success(record: SimplifiedRecord, resolution: Resolution) -> Self {
        Self {
            record,
            subject: resolution.subjects,
            category: resolution.categories,
            topic: resolution.topics,
            confidence: resolution.confidence,
            failed: false,
        }
    }

    /// The failure shape; the record's own fields are carried unchanged.
    pub fn failure(record: SimplifiedRecord) -> Self {
        let placeholder: BTreeSet<String> = [ERROR_PROCESSING.to_string()].into_iter().collect();
        Self {
            record,
            subject: placeholder.clone(),
            category: placeholder,
            topic: vec![ERROR_PROCESSING.to_string()],
            confidence: Some(FAILURE_CONFIDENCE),
            failed: true,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed
    }

    pub fn target_id(&self) -> &str {
        &self.record.target_id
    }
}
