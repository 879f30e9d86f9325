//! Periodic task scheduler.
//!
//! One loop wakes on a fixed tick and starts every job whose next fire time
//! has passed. Jobs run in their own tasks, so a slow job never delays another
//! one. Each job has a [`SingleFlight`]: when a job is due while its previous
//! run is still going, that firing is skipped. Errors and panics in a job are
//! logged and the schedule carries on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::flight::{FlightGuard, SingleFlight};

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Job {
    name: &'static str,
    period: Duration,
    next_fire: Instant,
    flight: SingleFlight,
    task: TaskFn,
}

/// Runs named jobs at fixed periods.
pub struct Scheduler {
    tick: Duration,
    jobs: Vec<Job>,
}

impl Scheduler {
    /// Create a scheduler that checks for due jobs every `tick`.
    #[must_use]
    pub const fn new(tick: Duration) -> Self {
        Self {
            tick,
            jobs: Vec::new(),
        }
    }

    /// Add a job that first fires one `period` from now.
    #[must_use]
    pub fn every<F, Fut>(mut self, name: &'static str, period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.jobs.push(Job {
            name,
            period,
            next_fire: Instant::now() + period,
            flight: SingleFlight::new(),
            task: Arc::new(move || task().boxed()),
        });
        self
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run the schedule forever.
    pub async fn run(mut self) {
        for job in &self.jobs {
            tracing::info!(task = job.name, period_secs = job.period.as_secs(), "Scheduled task");
        }

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.fire_due(Instant::now());
        }
    }

    /// Run the schedule as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn fire_due(&mut self, now: Instant) {
        for job in &mut self.jobs {
            if job.next_fire > now {
                continue;
            }
            while job.next_fire <= now {
                job.next_fire += job.period;
            }

            match job.flight.try_acquire() {
                Some(guard) => {
                    tracing::debug!(task = job.name, "Running scheduled task");
                    tokio::spawn(run_job(job.name, Arc::clone(&job.task), guard));
                }
                None => {
                    tracing::warn!(task = job.name, "Previous run still in progress, skipping");
                }
            }
        }
    }
}

async fn run_job(name: &'static str, task: TaskFn, _guard: FlightGuard) {
    match tokio::spawn(task()).await {
        Ok(Ok(())) => tracing::debug!(task = name, "Scheduled task finished"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Scheduled task failed"),
        Err(e) => tracing::error!(task = name, error = %e, "Scheduled task panicked"),
    }
}
