//! Run summary and output persistence

use crate::label::LabelingResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("result count {results} does not match processed count {processed}")]
    CountMismatch { results: usize, processed: usize },

    #[error("cannot write output {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize results: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Every record observed in the source.
    pub scanned_count: usize,
    /// Records that passed the filter; always equals `results.len()`.
    pub processed_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_seconds: f64,
    pub model_name: String,
    pub results: Vec<LabelingResult>,
}

/// Identity and timing of a run, fixed when it starts.
#[derive(Debug, Clone)]
pub struct RunClock {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Assemble the summary. Results are ordered by target id.
pub fn finalize(
    mut results: Vec<LabelingResult>,
    scanned_count: usize,
    processed_count: usize,
    clock: &RunClock,
    model_name: &str,
) -> Result<RunSummary, AggregateError> {
    if results.len() != processed_count {
        return Err(AggregateError::CountMismatch {
            results: results.len(),
            processed: processed_count,
        });
    }

    results.sort_by(|a, b| a.target_id().cmp(b.target_id()));
    let failed = results.iter().filter(|r| r.is_failure()).count();

    Ok(RunSummary {
        run_id: clock.run_id,
        started_at: clock.started_at,
        scanned_count,
        processed_count,
        succeeded: processed_count - failed,
        failed,
        duration_seconds: clock.elapsed_seconds(),
        model_name: model_name.to_string(),
        results,
    })
}

/// Where the finished result list is written, in one piece.
pub trait OutputSink: Send + Sync {
    fn write(&self, results: &[LabelingResult]) -> Result<(), AggregateError>;
}

/// Pretty-printed JSON array, written to a temp file next to the target
/// and persisted into place. A failed write leaves no temp file behind.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AggregateError {
        AggregateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl OutputSink for JsonFileSink {
    fn write(&self, results: &[LabelingResult]) -> Result<(), AggregateError> {
        let json = serde_json::to_vec_pretty(results)?;

        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
                parent
            }
            None => Path::new("."),
        };

        // Dropped (and removed) on any early return, including a failed persist.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        info!(path = %self.path.display(), count = results.len(), "output written");
        Ok(())
    }
}

/// Keeps the last written result list in memory.
#[derive(Default)]
pub struct MemorySink {
    written: Mutex<Option<Vec<LabelingResult>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last written list, or `None` if nothing was written.
    pub fn written(&self) -> Option<Vec<LabelingResult>> {
        self.written.lock().ok().and_then(|w| w.clone())
    }
}

impl OutputSink for MemorySink {
    fn write(&self, results: &[LabelingResult]) -> Result<(), AggregateError> {
        if let Ok(mut written) = self.written.lock() {
            *written = Some(results.to_vec());
        }
        Ok(())
    }
}
