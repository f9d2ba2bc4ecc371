//! Record filter predicate

use super::RawRecord;
use std::collections::HashSet;

/// Which records a run labels.
///
/// Dimensions combine with AND; an empty dimension matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub subjects: HashSet<String>,
    pub ids: HashSet<String>,
    pub topics: HashSet<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn is_match_all(&self) -> bool {
        self.subjects.is_empty() && self.ids.is_empty() && self.topics.is_empty()
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        intersects(&self.subjects, record.subjects())
            && (self.ids.is_empty() || self.ids.contains(&record.id))
            && intersects(&self.topics, record.topics())
    }
}

fn intersects(wanted: &HashSet<String>, values: &[String]) -> bool {
    wanted.is_empty() || values.iter().any(|v| wanted.contains(v))
}
