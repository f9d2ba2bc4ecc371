//! Labeler configuration
//!
//! Loaded from YAML. Every field has a default, so a partial file (or no
//! file at all at the default location) is a usable configuration.
//! Credentials never live here: a provider section only names the
//! environment variable its key is read from.

use crate::dispatch::DEFAULT_CONCURRENCY;
use crate::provider::{GEMINI_BASE_URL, OPENAI_BASE_URL};
use crate::record::DEFAULT_RECORD_PATH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PROMPT_NAME: &str = "target-categorization";
pub const DEFAULT_OUTPUT: &str = "labeled_targets.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    #[serde(deserialize_with = "openai_settings")]
    pub openai: ProviderSettings,
    #[serde(deserialize_with = "gemini_settings")]
    pub gemini: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderSettings {
                base_url: OPENAI_BASE_URL.to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            gemini: ProviderSettings {
                base_url: GEMINI_BASE_URL.to_string(),
                api_key_env: "GOOGLE_API_KEY".to_string(),
            },
        }
    }
}

/// A provider section as written; absent fields keep that provider's default.
#[derive(Deserialize)]
struct SettingsOverride {
    base_url: Option<String>,
    api_key_env: Option<String>,
}

impl SettingsOverride {
    fn apply(self, defaults: ProviderSettings) -> ProviderSettings {
        ProviderSettings {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            api_key_env: self.api_key_env.unwrap_or(defaults.api_key_env),
        }
    }
}

fn openai_settings<'de, D>(deserializer: D) -> Result<ProviderSettings, D::Error>
where
    D: serde::Deserializer<'de>,
{
    SettingsOverride::deserialize(deserializer).map(|o| o.apply(ProvidersConfig::default().openai))
}

fn gemini_settings<'de, D>(deserializer: D) -> Result<ProviderSettings, D::Error>
where
    D: serde::Deserializer<'de>,
{
    SettingsOverride::deserialize(deserializer).map(|o| o.apply(ProvidersConfig::default().gemini))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerConfig {
    /// Record source document.
    pub input: PathBuf,
    /// Dotted path to the record array inside the source document.
    pub record_path: String,
    pub vocabulary: PathBuf,
    pub prompt_dir: PathBuf,
    pub prompt_name: String,
    pub output: PathBuf,
    pub concurrency: usize,
    /// Per-call timeout in seconds; 0 disables it.
    pub call_timeout_secs: u64,
    /// Trailing sentences removed from record explanations. Empty by
    /// default: no sentence is built in, so an export that appends one must
    /// list it here verbatim.
    pub explanation_boilerplate: Vec<String>,
    pub providers: ProvidersConfig,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("all_targets.json"),
            record_path: DEFAULT_RECORD_PATH.to_string(),
            vocabulary: PathBuf::from("vocabulary.json"),
            prompt_dir: PathBuf::from("prompts"),
            prompt_name: DEFAULT_PROMPT_NAME.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout_secs: 120,
            explanation_boilerplate: Vec::new(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl LabelerConfig {
    /// `~/.config/targetlabel/config.yaml` (platform equivalent).
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"));
        config_dir.join("targetlabel").join("config.yaml")
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let config = Self::from_yaml(&content, &shown)?;
        debug!(path = %shown, "config loaded");
        Ok(config)
    }

    /// Load the file at [`Self::default_path`], or built-in defaults if it
    /// does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.is_file() {
            Self::load(&path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_yaml(source: &str, origin: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: Self = if source.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(source).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.prompt_name.trim().is_empty() {
            return Err(ConfigError::Invalid("prompt_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}
