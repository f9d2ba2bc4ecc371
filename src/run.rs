//! One labeling run, end to end
//!
//! Fetch the prompt template, load the vocabulary, stream and filter the
//! records, label each one through the provider under the concurrency gate,
//! then aggregate and write the results. Anything that goes wrong with a
//! single record becomes that record's failure-shaped result; only the
//! setup steps, the record source and the output write can fail the run.

use crate::aggregate::{self, AggregateError, JsonFileSink, OutputSink, RunClock, RunSummary};
use crate::config::{ConfigError, LabelerConfig};
use crate::dispatch::{CancellationToken, DispatchError, Dispatcher};
use crate::label::LabelingResult;
use crate::prompt::{CompiledPrompt, FilePromptSource, PromptError, PromptInputs, PromptSource, PromptTemplate};
use crate::provider::{ProviderError, ProviderRegistry};
use crate::record::{RecordFilter, RecordStream, SimplifiedRecord, StreamError};
use crate::resolve::{resolve, ResolveError};
use crate::trace::{LogTraceSink, RecordTrace, TraceSink, TraceStatus};
use crate::vocabulary::{self, VocabularyError, VocabularyIndex};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Filters for one run. Every list is optional; an empty list matches all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunRequest {
    pub subjects: Vec<String>,
    pub ids: Vec<String>,
    pub topics: Vec<String>,
    /// Restricts the vocabulary shown to the model, not the one used to resolve.
    pub vocabulary_subjects: Vec<String>,
}

impl RunRequest {
    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter::new()
            .with_subjects(self.subjects.iter().cloned())
            .with_ids(self.ids.iter().cloned())
            .with_topics(self.topics.iter().cloned())
    }

    fn vocabulary_filter(&self) -> HashSet<String> {
        self.vocabulary_subjects.iter().cloned().collect()
    }
}

/// Why a single record ended up failure-shaped.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that abort a run. No output is written when one occurs.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Vocabulary(#[from] VocabularyError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("run cancelled after {completed} of {submitted} records")]
    Cancelled { submitted: usize, completed: usize },

    #[error("record worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl From<DispatchError<StreamError>> for RunError {
    fn from(err: DispatchError<StreamError>) -> Self {
        match err {
            DispatchError::Source(e) => RunError::Stream(e),
            DispatchError::Cancelled { submitted, completed } => {
                RunError::Cancelled { submitted, completed }
            }
            DispatchError::Worker(msg) => RunError::Worker(msg),
        }
    }
}

/// A failed run, with how long it took and the model if it was known by then.
#[derive(Debug, Error)]
#[error("labeling run failed after {elapsed_seconds:.2}s: {error}")]
pub struct RunFailure {
    #[source]
    pub error: RunError,
    pub elapsed_seconds: f64,
    pub model_name: Option<String>,
}

impl RunFailure {
    /// The JSON error document reported to the caller.
    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "error": "An internal server error occurred.",
            "details": self.error.to_string(),
            "elapsedSeconds": self.elapsed_seconds,
            "model": self.model_name,
        })
    }
}

/// Runs labeling jobs. Provider clients are built once and shared by every
/// run and every record task.
pub struct Labeler {
    config: LabelerConfig,
    providers: Arc<ProviderRegistry>,
    prompts: Arc<dyn PromptSource>,
    traces: Arc<dyn TraceSink>,
    output: Arc<dyn OutputSink>,
}

impl Labeler {
    pub fn new(
        config: LabelerConfig,
        providers: Arc<ProviderRegistry>,
        prompts: Arc<dyn PromptSource>,
    ) -> Self {
        let output = Arc::new(JsonFileSink::new(config.output.clone()));
        Self {
            config,
            providers,
            prompts,
            traces: Arc::new(LogTraceSink),
            output,
        }
    }

    /// Providers from the environment, templates from `prompt_dir`.
    pub fn from_config(config: LabelerConfig) -> Result<Self, RunError> {
        config.validate()?;
        let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
        let prompts = Arc::new(FilePromptSource::new(config.prompt_dir.clone()));
        Ok(Self::new(config, providers, prompts))
    }

    pub fn with_trace_sink(mut self, traces: Arc<dyn TraceSink>) -> Self {
        self.traces = traces;
        self
    }

    pub fn with_output_sink(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }

    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunFailure> {
        let clock = RunClock::start();
        let mut model_name = None;

        let outcome = self
            .execute(request, cancel, &clock, &mut model_name)
            .instrument(info_span!("run", run_id = %clock.run_id))
            .await;

        outcome.map_err(|error| {
            let elapsed_seconds = clock.elapsed_seconds();
            error!(run_id = %clock.run_id, error = %error, elapsed_seconds, "run failed");
            RunFailure {
                error,
                elapsed_seconds,
                model_name,
            }
        })
    }

    async fn execute(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
        clock: &RunClock,
        model_name: &mut Option<String>,
    ) -> Result<RunSummary, RunError> {
        let template = self.prompts.fetch(&self.config.prompt_name)?;
        *model_name = Some(template.model.clone());
        info!(
            prompt = %template.name,
            provider = %template.provider,
            model = %template.model,
            "prompt template fetched"
        );

        let loaded = vocabulary::load(&self.config.vocabulary, &request.vocabulary_filter())?;
        info!(
            topics = loaded.index.len(),
            shown = loaded.prompt.len(),
            "vocabulary loaded"
        );

        let records = RecordStream::open(
            &self.config.input,
            &self.config.record_path,
            request.record_filter(),
        )?;
        let stats = records.stats();
        let boilerplate = self.config.explanation_boilerplate.clone();
        let records =
            records.map(move |item| item.map(|raw| SimplifiedRecord::from_raw(raw, &boilerplate)));

        let labeling = Arc::new(RecordLabeler {
            vocabulary: loaded.prompt.render(),
            index: loaded.index,
            template,
            providers: self.providers.clone(),
            traces: self.traces.clone(),
            timeout: self.config.call_timeout(),
            run_id: clock.run_id,
        });

        let dispatcher = Dispatcher::new(self.config.concurrency).with_cancellation(cancel);
        let outcome = dispatcher
            .dispatch(records, |record: SimplifiedRecord| {
                let labeling = labeling.clone();
                let span = info_span!("label_record", target_id = %record.target_id);
                async move { labeling.label(record).await }.instrument(span)
            })
            .await?;

        let summary = aggregate::finalize(
            outcome.results,
            stats.scanned(),
            stats.matched(),
            clock,
            &labeling.template.model,
        )?;
        self.output.write(&summary.results)?;

        info!(
            scanned = summary.scanned_count,
            processed = summary.processed_count,
            failed = summary.failed,
            duration_seconds = summary.duration_seconds,
            "run complete"
        );
        Ok(summary)
    }
}

/// Shared, read-only state for labeling single records.
struct RecordLabeler {
    template: PromptTemplate,
    index: VocabularyIndex,
    vocabulary: String,
    providers: Arc<ProviderRegistry>,
    traces: Arc<dyn TraceSink>,
    timeout: Option<Duration>,
    run_id: Uuid,
}

impl RecordLabeler {
    /// Never fails: every error becomes the failure-shaped result.
    async fn label(&self, record: SimplifiedRecord) -> LabelingResult {
        let started = Instant::now();
        let prompt = self.template.compile(
            &PromptInputs::new()
                .set("label", record.label.as_deref())
                .set("description", record.description.as_deref())
                .set("explanation", record.explanation.as_deref())
                .set("vocabulary", Some(self.vocabulary.as_str())),
        );

        let (output, outcome) = match self.complete(&prompt).await {
            Ok(text) => {
                let resolved = resolve(&text, &self.index).map_err(RecordError::from);
                (Some(text), resolved)
            }
            Err(e) => (None, Err(e)),
        };

        let target_id = record.target_id.clone();
        let (result, status, error) = match outcome {
            Ok(resolution) => {
                debug!(topics = resolution.topics.len(), "record labeled");
                (LabelingResult::success(record, resolution), TraceStatus::Success, None)
            }
            Err(e) => {
                warn!(target_id = %target_id, error = %e, "failed to label record");
                (LabelingResult::failure(record), TraceStatus::Error, Some(e.to_string()))
            }
        };

        self.traces.record(RecordTrace {
            trace_id: Uuid::new_v4(),
            run_id: self.run_id,
            target_id,
            model: self.template.model.clone(),
            input: prompt,
            output,
            error,
            status,
            latency: started.elapsed(),
        });
        result
    }

    async fn complete(&self, prompt: &CompiledPrompt) -> Result<String, RecordError> {
        let call = self.providers.invoke(
            &self.template.provider,
            &self.template.model,
            prompt,
            &self.template.parameters,
        );
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RecordError::Timeout(limit))?
                .map_err(RecordError::from),
            None => call.await.map_err(RecordError::from),
        }
    }
}
