//! Per-job scheduling: one `JobScheduler` per (schedule instance, job).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::interval::parse_interval;
use crate::job::{JobExecutor, JobHandler, JobResult};
use crate::repo::JobRepository;
use crate::timer::{self, TimerHandle};

/// State held while the scheduler's timer is armed.
struct Scheduled {
    timer: TimerHandle,
    interval_ms: u64,
}

/// Schedules periodic executions of a single job on one instance.
///
/// The scheduler owns its timer and its pending set exclusively; the
/// only shared state is in the repositories. `stop` drains: it resolves
/// once every invocation launched by this scheduler has settled.
pub struct JobScheduler {
    job_name: String,
    handler: JobHandler,
    executor: JobExecutor,
    job_repository: Arc<dyn JobRepository>,
    state: Mutex<Option<Scheduled>>,
    pending: Mutex<JoinSet<()>>,
    unexpected_errors: AtomicU64,
}

impl JobScheduler {
    pub fn new(
        job_name: impl Into<String>,
        handler: JobHandler,
        executor: JobExecutor,
        job_repository: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            handler,
            executor,
            job_repository,
            state: Mutex::new(None),
            pending: Mutex::new(JoinSet::new()),
            unexpected_errors: AtomicU64::new(0),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Errors that escaped the periodic loop. Monotone; observability
    /// only, never consulted for scheduling decisions.
    pub fn unexpected_error_count(&self) -> u64 {
        self.unexpected_errors.load(Ordering::Relaxed)
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// The parsed interval while started.
    pub async fn interval_ms(&self) -> Option<u64> {
        self.state.lock().await.as_ref().map(|s| s.interval_ms)
    }

    /// Arm the timer for this job.
    ///
    /// Any prior timer is stopped first, so calling `start` twice leaves
    /// exactly one active timer. A missing job definition is logged and
    /// skipped; an unparseable interval is a programmer error and is
    /// returned to the caller.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            previous.timer.stop();
        }

        let job = match self.job_repository.find_one(&self.job_name).await? {
            Some(job) => job,
            None => {
                tracing::error!(job = %self.job_name, "Cannot start scheduling: job not found");
                return Ok(());
            }
        };

        let interval_ms = parse_interval(&job.interval)?;
        let delay = first_fire_delay(interval_ms, job.immediate, job.last_finished(), Utc::now());

        tracing::debug!(
            job = %self.job_name,
            interval_ms,
            delay_ms = delay.as_millis() as u64,
            "Scheduling job"
        );

        let scheduler = self.clone();
        let timer = timer::schedule(delay, Duration::from_millis(interval_ms), move || {
            let scheduler = scheduler.clone();
            async move {
                scheduler.execute_concurrently().await;
            }
        });

        *state = Some(Scheduled { timer, interval_ms });
        Ok(())
    }

    /// Cancel the timer and await settlement of every pending execution.
    ///
    /// After `stop` resolves, no further invocation originates from this
    /// scheduler until `start` is called again.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if let Some(scheduled) = state.take() {
                scheduled.timer.stop();
            }
        }

        let mut pending = self.pending.lock().await;
        while let Some(settled) = pending.join_next().await {
            if let Err(e) = settled {
                tracing::error!(job = %self.job_name, error = %e, "Pending execution aborted");
                self.unexpected_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        tracing::debug!(job = %self.job_name, "Job scheduler stopped");
    }

    /// Run the job once, bypassing the timer.
    pub async fn execute_once(&self) -> Result<JobResult> {
        match self.job_repository.find_one(&self.job_name).await? {
            Some(job) => self.executor.execute(&job, &self.handler).await,
            None => Ok(JobResult::not_found()),
        }
    }

    /// The periodic tick: decide how many invocations this tick may
    /// launch and dispatch them.
    ///
    /// Capacity is per-tick, so a tick may overlap invocations still
    /// running from earlier ticks; the cluster cap bounds the total.
    async fn execute_concurrently(self: Arc<Self>) {
        let job = match self.job_repository.find_one(&self.job_name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job = %self.job_name, "Skipping tick: job not found");
                return;
            }
            Err(e) => {
                tracing::error!(job = %self.job_name, error = %e, "Skipping tick: failed to load job");
                self.unexpected_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let num_to_execute = if job.max_running == 0 {
            job.concurrency
        } else {
            // A crashed peer can leave the counter above the cap; clamp
            // instead of underflowing.
            job.concurrency.min(job.max_running.saturating_sub(job.running))
        };

        let mut pending = self.pending.lock().await;
        if self.state.lock().await.is_none() {
            // Stopped between the tick firing and now; the drain in
            // stop() has already run, so nothing may be launched.
            return;
        }

        // Reap invocations that settled since the last tick.
        while let Some(settled) = pending.try_join_next() {
            if let Err(e) = settled {
                tracing::error!(job = %self.job_name, error = %e, "Pending execution aborted");
                self.unexpected_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::debug!(job = %self.job_name, num_to_execute, "Tick");

        for _ in 0..num_to_execute {
            let scheduler = self.clone();
            let job = job.clone();
            pending.spawn(async move {
                if let Err(e) = scheduler.executor.execute(&job, &scheduler.handler).await {
                    tracing::error!(job = %job.name, error = %e, "Unexpected execution error");
                    scheduler.unexpected_errors.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    }
}

/// When the first fire of a newly started job is due.
///
/// A job that has run before stays on its original cadence (the period
/// counts from `last_finished`), which also keeps an immediate job from
/// double-firing across a fast restart.
pub fn first_fire_delay(
    interval_ms: u64,
    immediate: bool,
    last_finished: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Duration {
    match last_finished {
        Some(last) => {
            let elapsed_ms = (now - last).num_milliseconds().max(0) as u64;
            Duration::from_millis(interval_ms.saturating_sub(elapsed_ms))
        }
        None if immediate => Duration::ZERO,
        None => Duration::from_millis(interval_ms),
    }
}
