//! Error sink and task tracking
//!
//! Every runtime component reports failures through an [`ErrorSink`]; the
//! watcher owns the single consumer. Dispatches and action runs are
//! spawned through a [`TaskTracker`] so they can optionally be drained on
//! shutdown.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::Error;

/// Sending half of the shared error channel
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<Error>,
}

impl ErrorSink {
    /// Create a sink together with its single consumer end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an error
    ///
    /// After the watcher has stopped the sink is closed and the error is
    /// only logged.
    pub fn report(&self, error: Error) {
        if let Err(mpsc::error::SendError(error)) = self.tx.send(error) {
            warn!(error = %error, kind = %error.kind(), "error sink closed, dropping error");
        }
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Tracks spawned background tasks
///
/// Tasks are never awaited implicitly; [`TaskTracker::drain`] is the only
/// place that waits for them.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl TaskTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished tasks so the set only holds live ones
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no tasks are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every tracked task, including ones spawned while draining
    ///
    /// Returns `false` when `timeout` elapsed first; the remaining tasks
    /// are detached and keep running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *tasks)
            };

            if batch.is_empty() {
                return true;
            }

            loop {
                match tokio::time::timeout_at(deadline, batch.join_next()).await {
                    Ok(Some(result)) => log_join_result(result),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(remaining = batch.len(), "drain deadline reached, detaching tasks");
                        batch.detach_all();
                        return false;
                    }
                }
            }
        }
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        warn!(error = %e, "background task panicked");
    }
}
