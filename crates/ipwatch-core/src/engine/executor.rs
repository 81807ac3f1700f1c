//! Action Runner
//!
//! Runs configured external commands in reaction to events. Every action
//! runs as its own tracked task; nothing waits for actions to finish.
//!
//! ## Failure signals
//!
//! Each of the following is reported to the error sink as an executor
//! error:
//! - the process could not be spawned
//! - a line written to standard error (one error per line)
//! - a non-zero exit status or a failed wait
//! - the deadline expired and the process was killed

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use super::tasks::{ErrorSink, TaskTracker};
use crate::config::ActionConfig;
use crate::error::Error;

/// Executes actions with a bounded lifetime
#[derive(Debug, Clone)]
pub struct ActionRunner {
    default_timeout: Duration,
    errors: ErrorSink,
    tasks: TaskTracker,
}

impl ActionRunner {
    /// Create a runner
    ///
    /// # Parameters
    ///
    /// - `default_timeout`: Deadline for actions with `ttl == 0`
    /// - `errors`: Sink receiving executor errors
    /// - `tasks`: Tracker the action tasks are spawned on
    pub fn new(default_timeout: Duration, errors: ErrorSink, tasks: TaskTracker) -> Self {
        Self {
            default_timeout,
            errors,
            tasks,
        }
    }

    /// Launch every action as an independent task
    pub fn execute_many(&self, actions: &[ActionConfig]) {
        for action in actions {
            debug!(action = %action, "executing action");
            let runner = self.clone();
            let action = action.clone();
            self.tasks.spawn(async move { runner.execute(&action).await });
        }
    }

    /// Run one action to completion or until its deadline
    pub async fn execute(&self, action: &ActionConfig) {
        let label = action.to_string();
        let timeout = action.effective_timeout(self.default_timeout);

        let mut child = match Command::new(&action.interpreter)
            .args(action.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.errors
                    .report(Error::executor(format!("failed to start '{}': {}", label, e)));
                return;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_stdout(stdout, label.clone()));
        }
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, label.clone(), self.errors.clone())));

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(action = %label, max = ?limit, "execution time exceeded, killing process");
                    // Only the direct child is killed; its own children may survive
                    if let Err(e) = child.start_kill() {
                        warn!(action = %label, error = %e, "failed to kill process");
                    }
                    if let Err(e) = child.wait().await {
                        warn!(action = %label, error = %e, "failed to reap killed process");
                    }
                    self.errors.report(Error::executor(format!(
                        "'{}': execution time exceeded (max is {:?})",
                        label, limit
                    )));
                    return;
                }
            },
            None => child.wait().await,
        };

        let stderr_lines = match stderr_task {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        };

        match status {
            Ok(status) if status.success() => {
                debug!(action = %label, stderr_lines, "finished executing");
            }
            Ok(status) => {
                self.errors
                    .report(Error::executor(format!("'{}' exited with {}", label, status)));
            }
            Err(e) => {
                self.errors
                    .report(Error::executor(format!("failed to wait for '{}': {}", label, e)));
            }
        }
    }
}

async fn log_stdout(stdout: ChildStdout, action: String) {
    let mut lines = LinesStream::new(BufReader::new(stdout).lines());
    while let Some(Ok(line)) = lines.next().await {
        info!(action = %action, "{}", line);
    }
}

/// Forward every stderr line as an executor error; returns the line count
async fn forward_stderr(stderr: ChildStderr, action: String, errors: ErrorSink) -> usize {
    let mut lines = LinesStream::new(BufReader::new(stderr).lines());
    let mut count = 0;

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                count += 1;
                errors.report(Error::executor(format!("'{}': {}", action, line)));
            }
            Err(e) => {
                warn!(action = %action, error = %e, "failed to read stderr");
                break;
            }
        }
    }

    count
}
