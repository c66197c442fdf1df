//! Bounded-concurrency task runner.
//!
//! Tasks are started in input order, never more than `limit` at a time, and
//! each one runs as its own tokio task. The first failure resolves the whole
//! run. Under [`CancelPolicy::Detach`] the tasks still in flight at that
//! point keep running until they settle and their outcomes are dropped;
//! [`CancelPolicy::Abort`] aborts them instead.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// Concurrency used when the caller does not pick one.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A deferred unit of work. Nothing runs until the scheduler calls it.
pub type Task<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// What happens to in-flight tasks once a run has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Let them finish and discard their outcomes.
    #[default]
    Detach,
    /// Abort them at their next suspension point.
    Abort,
}

/// Resolve a requested limit: absent uses [`DEFAULT_CONCURRENCY`], zero
/// runs one task at a time.
pub fn effective_limit(requested: Option<usize>) -> usize {
    match requested {
        None => DEFAULT_CONCURRENCY,
        Some(0) => 1,
        Some(limit) => limit,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    limit: usize,
    cancel: CancelPolicy,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Scheduler {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit: effective_limit(limit),
            cancel: CancelPolicy::default(),
        }
    }

    pub fn with_cancel_policy(mut self, cancel: CancelPolicy) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        self.cancel
    }

    /// Run every task and return their results in input order.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<T, E>(&self, tasks: Vec<Task<T, E>>) -> Result<Vec<T>, SchedulerError<E>>
    where
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let total = tasks.len();
        info!(total, limit = self.limit, "running tasks");

        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut pending = tasks.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut handles: HashMap<usize, AbortHandle> = HashMap::new();

        loop {
            while in_flight.len() < self.limit {
                let Some((index, task)) = pending.next() else {
                    break;
                };
                debug!(task = index + 1, total, "starting task");
                let handle = tokio::spawn(task());
                handles.insert(index, handle.abort_handle());
                in_flight.push(async move { (index, handle.await) });
            }

            let Some((index, joined)) = in_flight.next().await else {
                break;
            };
            handles.remove(&index);

            match joined {
                Ok(Ok(value)) => {
                    info!(task = index + 1, total, "task finished");
                    results[index] = Some(value);
                }
                Ok(Err(source)) => {
                    self.abandon(handles);
                    return Err(SchedulerError::Task { index, source });
                }
                Err(err) => {
                    warn!(task = index + 1, error = %err, "task did not complete");
                    self.abandon(handles);
                    return Err(SchedulerError::Panicked { index });
                }
            }
        }

        let collected: Vec<T> = results.into_iter().flatten().collect();
        debug_assert_eq!(collected.len(), total);
        Ok(collected)
    }

    fn abandon(&self, handles: HashMap<usize, AbortHandle>) {
        if handles.is_empty() {
            return;
        }
        match self.cancel {
            CancelPolicy::Detach => {
                warn!(
                    in_flight = handles.len(),
                    "run failed; in-flight tasks keep running and their results are discarded"
                );
            }
            CancelPolicy::Abort => {
                warn!(in_flight = handles.len(), "run failed; aborting in-flight tasks");
                for handle in handles.values() {
                    handle.abort();
                }
            }
        }
    }
}
