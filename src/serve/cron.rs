//! Cron scheduling subsystem.
//!
//! # Responsibilities
//! - Collect `(expression, job)` pairs contributed by modules
//! - Sleep until the earliest due job, run everything due at that instant
//! - Stop scheduling on shutdown and let in-flight jobs finish
//!
//! # Design Decisions
//! - Expressions use the `cron` crate syntax (seconds field first)
//! - Jobs run on their own tasks so a slow job does not delay the next tick
//! - An invalid expression is reported when serving starts, not at registration

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::registry::{Capability, Module};
use crate::serve::{ServeError, Subsystem};
use crate::BoxError;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct Job {
    name: String,
    schedule: cron::Schedule,
    run: JobFn,
}

/// The external handle cron modules register their jobs on.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
    invalid: Vec<(String, String)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` to run on `expression`, e.g. `"0 */5 * * * *"`.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, expression: &str, job: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let name = name.into();
        match cron::Schedule::from_str(expression) {
            Ok(schedule) => {
                tracing::debug!(job = %name, expression, "Cron job registered");
                self.jobs.push(Job {
                    name,
                    schedule,
                    run: Arc::new(move || Box::pin(job()) as BoxFuture<'static, _>),
                });
            }
            Err(e) => {
                tracing::error!(job = %name, expression, error = %e, "Invalid cron expression");
                self.invalid.push((name, e.to_string()));
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// The earliest fire time strictly after `after`, and every job due then.
    pub fn next_due(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<usize>)> {
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut due = Vec::new();
        for (idx, job) in self.jobs.iter().enumerate() {
            let Some(at) = job.schedule.after(&after).next() else {
                continue;
            };
            match earliest {
                Some(current) if at > current => {}
                Some(current) if at == current => due.push(idx),
                _ => {
                    earliest = Some(at);
                    due.clear();
                    due.push(idx);
                }
            }
        }
        earliest.map(|at| (at, due))
    }

    fn check(&self) -> Result<(), ServeError> {
        match self.invalid.first() {
            Some((job, reason)) => Err(ServeError::Schedule {
                job: job.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Runs every job contributed by modules implementing
/// [`ServesCron`](crate::registry::ServesCron).
#[derive(Default)]
pub struct CronSubsystem {
    scheduler: Scheduler,
    bindings: usize,
}

impl CronSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        self.scheduler.check()?;
        let scheduler = self.scheduler;
        tracing::info!(jobs = scheduler.len(), "Scheduler starting");

        let mut running = JoinSet::new();
        loop {
            let Some((at, due)) = scheduler.next_due(Utc::now()) else {
                tracing::info!("No upcoming cron runs, waiting for shutdown");
                shutdown.cancelled().await;
                break;
            };
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            for idx in due {
                let job = &scheduler.jobs[idx];
                let name = job.name.clone();
                let run = job.run.clone();
                running.spawn(async move {
                    metrics::record_cron_run(&name);
                    if let Err(e) = run().await {
                        tracing::warn!(job = %name, error = %e, "Cron job failed");
                    }
                });
            }

            // Reap finished jobs without blocking.
            while running.try_join_next().is_some() {}
        }

        tracing::info!(in_flight = running.len(), "Scheduler stopping");
        while running.join_next().await.is_some() {}
        Ok(())
    }
}

impl Subsystem for CronSubsystem {
    fn capability(&self) -> Capability {
        Capability::Cron
    }

    fn bind(&mut self, module: &dyn Module) {
        if let Some(cron) = module.as_cron() {
            cron.serve_cron(&mut self.scheduler);
            self.bindings += 1;
        }
    }

    fn bindings(&self) -> usize {
        self.bindings
    }

    fn serve(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, Result<(), ServeError>> {
        Box::pin((*self).run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_next_due_picks_earliest_jobs() {
        let mut scheduler = Scheduler::new();
        scheduler.add("minutely", "0 * * * * *", || async { Ok(()) });
        scheduler.add("hourly", "0 0 * * * *", || async { Ok(()) });
        scheduler.add("also-minutely", "0 * * * * *", || async { Ok(()) });

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 15).unwrap();
        let (at, due) = scheduler.next_due(now).unwrap();

        assert_eq!(at, Utc.with_ymd_and_hms(2024, 1, 1, 10, 31, 0).unwrap());
        assert_eq!(due, vec![0, 2]);

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 59, 30).unwrap();
        let (_, due) = scheduler.next_due(now).unwrap();
        assert_eq!(due, vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_expression_is_reported() {
        let mut scheduler = Scheduler::new();
        scheduler.add("broken", "not a schedule", || async { Ok(()) });

        assert!(scheduler.is_empty());
        assert!(matches!(scheduler.check(), Err(ServeError::Schedule { .. })));
    }

    #[tokio::test]
    async fn test_jobs_fire_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();

        let mut subsystem = CronSubsystem::new();
        subsystem.scheduler.add("tick", "* * * * * *", move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Box::new(subsystem).serve(shutdown.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shutdown.cancel();

        assert!(task.await.unwrap().is_ok());
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
