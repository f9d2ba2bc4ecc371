//! Prompt templates
//!
//! A template names the provider and model it was written for, carries the
//! model parameters, and renders either a single text prompt or an ordered
//! list of chat turns from the per-record inputs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template '{0}' not found")]
    NotFound(String),

    #[error("cannot read prompt template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed prompt template {path}: {message}")]
    Parse { path: String, message: String },
}

/// One role/content turn of a chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptBody {
    Text(String),
    Chat(Vec<ChatTurn>),
}

/// A rendered prompt, ready for a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompiledPrompt {
    Text(String),
    Chat(Vec<ChatTurn>),
}

impl CompiledPrompt {
    /// Chat turns as-is; a text prompt becomes a single user turn.
    pub fn turns(&self) -> Vec<ChatTurn> {
        match self {
            Self::Text(text) => vec![ChatTurn::new("user", text.clone())],
            Self::Chat(turns) => turns.clone(),
        }
    }

    /// One string: text as-is, chat turns as `role: content` blocks
    /// separated by a blank line.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Chat(turns) => turns
                .iter()
                .map(|t| format!("{}: {}", t.role, t.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Named values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    values: HashMap<String, String>,
}

impl PromptInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value; `None` renders as the empty string.
    pub fn set(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.values
            .insert(name.into(), value.unwrap_or_default().to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    /// Kept as written; an unknown provider only fails when a record is sent.
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub body: PromptBody,
}

impl PromptTemplate {
    pub fn compile(&self, inputs: &PromptInputs) -> CompiledPrompt {
        match &self.body {
            PromptBody::Text(text) => CompiledPrompt::Text(render(text, inputs)),
            PromptBody::Chat(turns) => CompiledPrompt::Chat(
                turns
                    .iter()
                    .map(|t| ChatTurn::new(t.role.clone(), render(&t.content, inputs)))
                    .collect(),
            ),
        }
    }

    /// Parse a template from YAML (JSON is accepted too, being a YAML subset).
    pub fn from_yaml(source: &str, origin: &str) -> Result<Self, PromptError> {
        serde_yaml::from_str(source).map_err(|e| PromptError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }
}

/// Replace `{{ name }}` placeholders. Unknown names are left verbatim.
fn render(template: &str, inputs: &PromptInputs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match inputs.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Where prompt templates are fetched from, once per run.
pub trait PromptSource: Send + Sync {
    fn fetch(&self, name: &str) -> Result<PromptTemplate, PromptError>;
}

/// Reads `<dir>/<name>.yaml`, `<name>.yml` or `<name>.json`.
pub struct FilePromptSource {
    dir: PathBuf,
}

impl FilePromptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidate(&self, name: &str) -> Option<PathBuf> {
        ["yaml", "yml", "json"]
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
    }
}

impl PromptSource for FilePromptSource {
    fn fetch(&self, name: &str) -> Result<PromptTemplate, PromptError> {
        let path = self
            .candidate(name)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))?;
        read_template(&path)
    }
}

fn read_template(path: &Path) -> Result<PromptTemplate, PromptError> {
    let shown = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: shown.clone(),
        source,
    })?;
    PromptTemplate::from_yaml(&content, &shown)
}

/// Serves one in-memory template under its own name.
pub struct StaticPromptSource {
    template: PromptTemplate,
}

impl StaticPromptSource {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }
}

impl PromptSource for StaticPromptSource {
    fn fetch(&self, name: &str) -> Result<PromptTemplate, PromptError> {
        if self.template.name == name {
            Ok(self.template.clone())
        } else {
            Err(PromptError::NotFound(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PromptInputs {
        PromptInputs::new()
            .set("label", Some("EGFR"))
            .set("explanation", None)
            .set("vocabulary", Some("Kinase\nOrbit"))
    }

    #[test]
    fn render_substitutes_known_names() {
        let out = render("Label: {{label}} / {{ vocabulary }}", &inputs());
        assert_eq!(out, "Label: EGFR / Kinase\nOrbit");
    }

    #[test]
    fn render_blanks_null_and_keeps_unknown() {
        let out = render("[{{explanation}}] {{unknown}} {{label", &inputs());
        assert_eq!(out, "[] {{unknown}} {{label");
    }

    #[test]
    fn chat_template_compiles_each_turn() {
        let template = PromptTemplate {
            name: "t".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            parameters: Default::default(),
            body: PromptBody::Chat(vec![
                ChatTurn::new("system", "Topics:\n{{vocabulary}}"),
                ChatTurn::new("user", "{{label}}"),
            ]),
        };
        let compiled = template.compile(&inputs());
        assert_eq!(
            compiled,
            CompiledPrompt::Chat(vec![
                ChatTurn::new("system", "Topics:\nKinase\nOrbit"),
                ChatTurn::new("user", "EGFR"),
            ])
        );
    }

    #[test]
    fn flatten_joins_role_and_content() {
        let compiled = CompiledPrompt::Chat(vec![
            ChatTurn::new("system", "be terse"),
            ChatTurn::new("user", "classify"),
        ]);
        assert_eq!(compiled.flatten(), "system: be terse\n\nuser: classify");
        assert_eq!(CompiledPrompt::Text("x".into()).turns(), vec![ChatTurn::new("user", "x")]);
    }

    #[test]
    fn parses_yaml_template() {
        let yaml = r#"
name: target-categorization
provider: gemini
model: gemini-1.5-flash-latest
parameters:
  temperature: 0.1
chat:
  - role: user
    content: "Classify {{label}}"
"#;
        let template = PromptTemplate::from_yaml(yaml, "inline").unwrap();
        assert_eq!(template.provider, "gemini");
        assert_eq!(template.parameters["temperature"], 0.1);
        assert!(matches!(template.body, PromptBody::Chat(ref turns) if turns.len() == 1));
    }

    #[test]
    fn file_source_finds_template_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("target-categorization.yaml"),
            "name: target-categorization\nprovider: openai\nmodel: m\ntext: \"{{label}}\"\n",
        )
        .unwrap();

        let source = FilePromptSource::new(dir.path());
        let template = source.fetch("target-categorization").unwrap();
        assert_eq!(template.body, PromptBody::Text("{{label}}".into()));
        assert!(matches!(source.fetch("other"), Err(PromptError::NotFound(_))));
    }
}
