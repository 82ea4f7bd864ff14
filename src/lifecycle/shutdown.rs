//! Shutdown coordination.
//!
//! # Responsibilities
//! - Remember closers in the order their resources came up
//! - Run them newest first, once each, collecting every failure
//! - Give serving tasks a grace period, then abandon them

use std::time::Duration;

use tokio::task::JoinSet;

use crate::lifecycle::error::ShutdownError;
use crate::observability::metrics;
use crate::registry::Capability;
use crate::resource::{CloseFailure, Closer};
use crate::serve::ServeError;

/// Closers registered during provisioning.
#[derive(Debug, Default)]
pub struct ShutdownList {
    closers: Vec<(String, Closer)>,
}

impl ShutdownList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, closer: Closer) {
        self.closers.push((name.into(), closer));
    }

    pub fn len(&self) -> usize {
        self.closers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closers.is_empty()
    }

    /// Run every closer in reverse registration order.
    pub async fn close_all(self) -> Result<(), ShutdownError> {
        let mut failures = Vec::new();
        for (name, closer) in self.closers.into_iter().rev() {
            tracing::debug!(closer = %name, "Running closer");
            if let Err(source) = closer.close().await {
                tracing::warn!(closer = %name, error = %source, "Closer failed");
                metrics::record_closer_failure();
                failures.push(CloseFailure { name, source });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}

/// Outcome of one serving task.
pub(crate) type TaskResult = (Capability, Result<(), ServeError>);

/// Wait up to `grace` for `tasks`, then abort and detach the rest.
///
/// Returns the results of tasks that finished and the number abandoned.
pub(crate) async fn drain_tasks(tasks: &mut JoinSet<TaskResult>, grace: Duration) -> (Vec<TaskResult>, usize) {
    let mut finished = Vec::new();
    let deadline = tokio::time::Instant::now() + grace;

    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(result))) => finished.push(result),
            Ok(Some(Err(e))) if e.is_panic() => {
                tracing::error!(error = %e, "Serving task panicked during drain");
            }
            Ok(Some(Err(_))) => {}
            Ok(None) => return (finished, 0),
            Err(_) => break,
        }
    }

    let abandoned = tasks.len();
    tracing::warn!(abandoned, grace_ms = grace.as_millis() as u64, "Grace period elapsed, abandoning tasks");
    // A task blocked off the scheduler never observes the abort, so do not join it.
    tasks.abort_all();
    tasks.detach_all();
    (finished, abandoned)
}
