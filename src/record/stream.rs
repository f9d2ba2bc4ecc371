//! Lazy record stream over a large nested JSON document
//!
//! A blocking decoder task walks the document with `serde_json`'s
//! incremental deserializer, descends along the record path, skips every
//! sibling value without materializing it, and decodes the record array one
//! element at a time. Matching records are handed to the consumer through a
//! channel as soon as they are decoded, so labeling starts while the rest of
//! the document is still being read.

use super::{RawRecord, RecordFilter};
use futures::Stream;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Where the record array lives in the exports this tool was built for.
pub const DEFAULT_RECORD_PATH: &str = "data.search_results.targets";

/// Errors that make the record source unusable. Any of them aborts a run.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot open record source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record source is not valid JSON: {0}")]
    Decode(String),

    #[error("record path '{0}' not found in source")]
    PathNotFound(String),

    #[error("value at record path '{0}' is not an array")]
    NotAnArray(String),
}

#[derive(Debug, Default)]
struct Counters {
    scanned: AtomicUsize,
    matched: AtomicUsize,
}

/// Read-only view of a stream's progress counters.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    counters: Arc<Counters>,
}

impl StreamStats {
    /// Records decoded so far, whether or not they passed the filter.
    pub fn scanned(&self) -> usize {
        self.counters.scanned.load(Ordering::Acquire)
    }

    /// Records that passed the filter and were yielded.
    pub fn matched(&self) -> usize {
        self.counters.matched.load(Ordering::Acquire)
    }
}

type Item = Result<RawRecord, StreamError>;

/// A finite, non-restartable sequence of filtered records.
///
/// Yields `Err` at most once, as its last item. Dropping the stream stops
/// the decoder at the next record boundary.
pub struct RecordStream {
    rx: mpsc::UnboundedReceiver<Item>,
    stats: StreamStats,
    _decoder: JoinHandle<()>,
}

impl RecordStream {
    /// Open a record file. Must be called from within a Tokio runtime.
    pub fn open(
        path: &Path,
        record_path: &str,
        filter: RecordFilter,
    ) -> Result<Self, StreamError> {
        let file = File::open(path).map_err(|source| StreamError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), record_path, "opening record stream");
        Ok(Self::from_reader(BufReader::new(file), record_path, filter))
    }

    /// Stream records from any reader. Must be called from within a Tokio runtime.
    pub fn from_reader<R>(reader: R, record_path: &str, filter: RecordFilter) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = StreamStats::default();
        let counters = stats.counters.clone();
        let path: Vec<String> = record_path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        let decoder = tokio::task::spawn_blocking(move || {
            if let Err(e) = decode(reader, &path, &filter, &tx, &counters) {
                let _ = tx.send(Err(e));
            }
        });

        Self {
            rx,
            stats,
            _decoder: decoder,
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.clone()
    }

    /// Next matching record, or `None` once the source is exhausted.
    pub async fn next(&mut self) -> Option<Item> {
        self.rx.recv().await
    }
}

impl Stream for RecordStream {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Shared state for one pass over the document.
struct Walk<'a> {
    path: &'a [String],
    filter: &'a RecordFilter,
    tx: &'a mpsc::UnboundedSender<Item>,
    counters: &'a Counters,
    reached: Cell<bool>,
    found: Cell<bool>,
    consumer_gone: Cell<bool>,
    fault: RefCell<Option<String>>,
}

fn decode<R: Read>(
    reader: R,
    path: &[String],
    filter: &RecordFilter,
    tx: &mpsc::UnboundedSender<Item>,
    counters: &Counters,
) -> Result<(), StreamError> {
    let walk = Walk {
        path,
        filter,
        tx,
        counters,
        reached: Cell::new(false),
        found: Cell::new(false),
        consumer_gone: Cell::new(false),
        fault: RefCell::new(None),
    };
    let dotted = path.join(".");

    let mut de = serde_json::Deserializer::from_reader(reader);
    if let Err(e) = (PathSeed { walk: &walk, depth: 0 }).deserialize(&mut de) {
        if walk.consumer_gone.get() {
            debug!("record consumer dropped; decoder stopping");
            return Ok(());
        }
        if walk.reached.get() && !walk.found.get() {
            return Err(StreamError::NotAnArray(dotted));
        }
        let message = walk.fault.borrow_mut().take().unwrap_or_else(|| e.to_string());
        return Err(StreamError::Decode(message));
    }
    de.end().map_err(|e| StreamError::Decode(e.to_string()))?;

    if !walk.found.get() {
        return Err(StreamError::PathNotFound(dotted));
    }
    debug!(
        scanned = counters.scanned.load(Ordering::Acquire),
        matched = counters.matched.load(Ordering::Acquire),
        "record stream exhausted"
    );
    Ok(())
}

/// Descends one path segment per level; at the end of the path, decodes records.
struct PathSeed<'w, 'a> {
    walk: &'w Walk<'a>,
    depth: usize,
}

impl<'de, 'w, 'a> DeserializeSeed<'de> for PathSeed<'w, 'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        if self.depth == self.walk.path.len() {
            self.walk.reached.set(true);
            deserializer.deserialize_any(RecordsVisitor { walk: self.walk })
        } else {
            deserializer.deserialize_any(self)
        }
    }
}

impl<'de, 'w, 'a> Visitor<'de> for PathSeed<'w, 'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an object containing '{}'", self.walk.path[self.depth])
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let wanted = &self.walk.path[self.depth];
        while let Some(key) = map.next_key::<String>()? {
            if &key == wanted {
                map.next_value_seed(PathSeed {
                    walk: self.walk,
                    depth: self.depth + 1,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }

    // Anything other than an object on the way down means the path is absent.

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(())
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> Result<(), E> {
        Ok(())
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<(), E> {
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, _v: i64) -> Result<(), E> {
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, _v: u64) -> Result<(), E> {
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<(), E> {
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }
}

struct RecordsVisitor<'w, 'a> {
    walk: &'w Walk<'a>,
}

impl<'de, 'w, 'a> Visitor<'de> for RecordsVisitor<'w, 'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let walk = self.walk;
        walk.found.set(true);
        loop {
            let record = match seq.next_element::<RawRecord>() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    let index = walk.counters.scanned.load(Ordering::Acquire);
                    *walk.fault.borrow_mut() = Some(format!("record #{}: {}", index, e));
                    return Err(e);
                }
            };
            walk.counters.scanned.fetch_add(1, Ordering::AcqRel);
            if !walk.filter.matches(&record) {
                continue;
            }
            walk.counters.matched.fetch_add(1, Ordering::AcqRel);
            if walk.tx.send(Ok(record)).is_err() {
                walk.consumer_gone.set(true);
                return Err(de::Error::custom("record consumer dropped"));
            }
        }
        Ok(())
    }
}
