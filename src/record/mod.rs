//! Target records: the raw shape read from the source document and the
//! simplified shape sent to the model and written to the output.

mod filter;
mod search;
mod stream;

pub use filter::RecordFilter;
pub use search::{find_ids_by_explanation, ExplanationCondition};
pub use stream::{RecordStream, StreamError, StreamStats, DEFAULT_RECORD_PATH};

use serde::{Deserialize, Deserializer, Serialize};

/// A field that may hold one string or a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> &[String] {
        match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v,
        }
    }
}

/// The `target_explanation` field, keeping `null` apart from an absent key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Explanation {
    #[default]
    Missing,
    Null,
    Text(String),
}

impl Explanation {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The key is present, even if its value is `null`.
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

// Only called when the key exists; an absent key falls back to `Missing`.
impl<'de> Deserialize<'de> for Explanation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(text) => Self::Text(text),
            None => Self::Null,
        })
    }
}

/// A record as it appears in the source document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_explanation: Explanation,
    #[serde(default)]
    pub subject: Option<OneOrMany>,
    #[serde(default)]
    pub topic: Option<OneOrMany>,
}

impl RawRecord {
    pub fn subjects(&self) -> &[String] {
        self.subject.as_ref().map(OneOrMany::values).unwrap_or(&[])
    }

    pub fn topics(&self) -> &[String] {
        self.topic.as_ref().map(OneOrMany::values).unwrap_or(&[])
    }
}

/// Record ids show up as strings in some exports and numbers in others.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a string or number, got {}",
            other
        ))),
    }
}

/// The fields of a record that travel through labeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedRecord {
    #[serde(rename = "Target_ID")]
    pub target_id: String,
    #[serde(rename = "Label")]
    pub label: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "Explanation")]
    pub explanation: Option<String>,
}

impl SimplifiedRecord {
    /// Simplify a raw record, stripping the first trailing boilerplate
    /// sentence found in the explanation and trimming what is left.
    pub fn from_raw(raw: RawRecord, boilerplate: &[String]) -> Self {
        let explanation = raw
            .target_explanation
            .into_text()
            .map(|text| strip_boilerplate(&text, boilerplate));
        Self {
            target_id: raw.id,
            label: raw.label,
            description: raw.description,
            explanation,
        }
    }
}

fn strip_boilerplate(text: &str, boilerplate: &[String]) -> String {
    let trimmed = text.trim_end();
    for sentence in boilerplate {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_suffix(sentence) {
            return rest.trim().to_string();
        }
    }
    trimmed.trim().to_string()
}
