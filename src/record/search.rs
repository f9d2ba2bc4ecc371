//! Record ids by explanation
//!
//! Answers questions like "which targets have a null explanation" over the
//! same lazy stream the labeler reads, without loading the document.

use super::{Explanation, RecordStream, StreamError};
use tracing::debug;

/// A condition on a record's `target_explanation`. A record without the
/// key never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationCondition {
    /// The key is present and `null`.
    IsNull,
    /// The explanation text contains this substring.
    Contains(String),
}

impl ExplanationCondition {
    pub fn matches(&self, explanation: &Explanation) -> bool {
        match (self, explanation) {
            (Self::IsNull, Explanation::Null) => true,
            (Self::Contains(needle), Explanation::Text(text)) => text.contains(needle.as_str()),
            _ => false,
        }
    }
}

/// Ids of the streamed records whose explanation meets `condition`, in
/// source order.
pub async fn find_ids_by_explanation(
    mut records: RecordStream,
    condition: &ExplanationCondition,
) -> Result<Vec<String>, StreamError> {
    let mut ids = Vec::new();
    while let Some(record) = records.next().await {
        let record = record?;
        if condition.matches(&record.target_explanation) {
            ids.push(record.id);
        }
    }
    debug!(matched = ids.len(), ?condition, "explanation search complete");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordFilter, DEFAULT_RECORD_PATH};
    use std::io::Cursor;

    const DOC: &str = r#"{"data": {"search_results": {"targets": [
        {"id": "1456", "label": "Telescope", "target_explanation": "Improved by Galileo Galilei."},
        {"id": "1457", "label": "Pendulum"},
        {"id": 1458, "label": "Lens", "target_explanation": null},
        {"id": "1459", "label": "Prism", "target_explanation": "Splits light."}
    ]}}}"#;

    fn stream() -> RecordStream {
        RecordStream::from_reader(Cursor::new(DOC.as_bytes()), DEFAULT_RECORD_PATH, RecordFilter::new())
    }

    #[tokio::test]
    async fn null_condition_skips_missing_keys() {
        let ids = find_ids_by_explanation(stream(), &ExplanationCondition::IsNull)
            .await
            .unwrap();
        assert_eq!(ids, vec!["1458"]);
    }

    #[tokio::test]
    async fn contains_condition_matches_text_only() {
        let condition = ExplanationCondition::Contains("Galilei".into());
        let ids = find_ids_by_explanation(stream(), &condition).await.unwrap();
        assert_eq!(ids, vec!["1456"]);
    }

    #[tokio::test]
    async fn stream_errors_are_returned() {
        let records = RecordStream::from_reader(
            Cursor::new(DOC.as_bytes()),
            "data.results",
            RecordFilter::new(),
        );
        let err = find_ids_by_explanation(records, &ExplanationCondition::IsNull)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::PathNotFound(_)));
    }

    #[test]
    fn missing_key_never_matches() {
        assert!(!ExplanationCondition::IsNull.matches(&Explanation::Missing));
        assert!(!ExplanationCondition::Contains(String::new()).matches(&Explanation::Missing));
        assert!(ExplanationCondition::Contains(String::new()).matches(&Explanation::Text("x".into())));
    }
}
