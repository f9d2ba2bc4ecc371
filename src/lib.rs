//! targetlabel: concurrent batch labeling of target records with an LLM
//!
//! Records are streamed out of a large JSON document, filtered, and sent to
//! an LLM provider one prompt per record under a fixed concurrency limit.
//! Each answer is mapped onto a controlled vocabulary of topics, which also
//! yields the record's subjects and categories.
//!
//! # Example
//!
//! ```no_run
//! use targetlabel::{CancellationToken, Labeler, LabelerConfig, RunRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let labeler = Labeler::from_config(LabelerConfig::load_default()?)?;
//! let summary = labeler
//!     .run(&RunRequest::default(), CancellationToken::new())
//!     .await?;
//! println!("{} of {} records labeled", summary.succeeded, summary.processed_count);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod label;
pub mod prompt;
pub mod provider;
pub mod record;
pub mod resolve;
pub mod run;
pub mod trace;
pub mod vocabulary;

pub use aggregate::{AggregateError, JsonFileSink, MemorySink, OutputSink, RunSummary};
pub use config::{ConfigError, LabelerConfig, ProviderSettings, ProvidersConfig};
pub use dispatch::{CancellationToken, DispatchError, Dispatcher};
pub use label::{LabelingResult, ERROR_PROCESSING};
pub use prompt::{
    CompiledPrompt, FilePromptSource, PromptError, PromptSource, PromptTemplate, StaticPromptSource,
};
pub use provider::{LlmProvider, ProviderError, ProviderKind, ProviderRegistry, ScriptedProvider};
pub use record::{
    find_ids_by_explanation, Explanation, ExplanationCondition, RawRecord, RecordFilter,
    RecordStream, SimplifiedRecord, StreamError,
};
pub use resolve::{resolve, Resolution, ResolveError};
pub use run::{Labeler, RecordError, RunError, RunFailure, RunRequest};
pub use trace::{LogTraceSink, MemoryTraceSink, NoopTraceSink, RecordTrace, TraceSink};
pub use vocabulary::{VocabularyEntry, VocabularyError, VocabularyIndex};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
