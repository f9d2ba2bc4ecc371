//! Bounded fan-out of per-record work
//!
//! Records are pulled from the source as fast as it yields them and each is
//! spawned as its own task straight away. A task must take a semaphore
//! permit before it runs its work, which caps the number of work items in
//! flight without ever making intake wait on the gate. Finished tasks are
//! reaped while intake continues.

mod cancel;

pub use cancel::CancellationToken;

use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Default number of work items allowed in flight.
pub const DEFAULT_CONCURRENCY: usize = 15;

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error("record source failed: {0}")]
    Source(E),

    #[error("dispatch cancelled after {completed} of {submitted} submitted records")]
    Cancelled { submitted: usize, completed: usize },

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Everything a completed dispatch produced, in completion order.
#[derive(Debug)]
pub struct DispatchOutcome<R> {
    pub results: Vec<R>,
    pub submitted: usize,
}

pub struct Dispatcher {
    limit: usize,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` once per item, at most `limit` at a time, and return once
    /// every submitted item has finished.
    ///
    /// `work` is expected to turn its own failures into an `R`. A source
    /// error, a cancellation or a panicking task aborts the outstanding
    /// tasks and fails the whole dispatch.
    pub async fn dispatch<S, T, E, R, F, Fut>(
        &self,
        items: S,
        work: F,
    ) -> Result<DispatchOutcome<R>, DispatchError<E>>
    where
        S: Stream<Item = Result<T, E>>,
        F: Fn(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut tasks: JoinSet<R> = JoinSet::new();
        let mut results = Vec::new();
        let mut submitted = 0usize;
        let mut intake_open = true;
        let mut items = std::pin::pin!(items);

        loop {
            if !intake_open && tasks.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                tasks.shutdown().await;
                return Err(DispatchError::Cancelled {
                    submitted,
                    completed: results.len(),
                });
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    // Re-checked at the top of the loop.
                }

                Some(joined) = tasks.join_next() => match joined {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        tasks.shutdown().await;
                        return Err(DispatchError::Worker(e.to_string()));
                    }
                },

                next = items.next(), if intake_open => match next {
                    Some(Ok(item)) => {
                        submitted += 1;
                        let gate = semaphore.clone();
                        let job = work(item);
                        tasks.spawn(async move {
                            let _permit = gate.acquire_owned().await.ok();
                            job.await
                        });
                    }
                    Some(Err(e)) => {
                        tasks.shutdown().await;
                        return Err(DispatchError::Source(e));
                    }
                    None => {
                        debug!(submitted, "intake exhausted");
                        intake_open = false;
                    }
                },
            }
        }

        info!(submitted, completed = results.len(), limit = self.limit, "dispatch complete");
        Ok(DispatchOutcome { results, submitted })
    }
}
