//! Runs a single invocation of a job handler and accounts for it.

use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::error::{MomoError, Result};
use crate::job::{ExecutionInfo, Job, JobHandler, JobResult};
use crate::repo::{ExecutionsRepository, JobRepository};

/// Handler error messages are persisted as plaintext; anything longer is
/// cut off.
const MAX_ERROR_MESSAGE_LENGTH: usize = 1000;

/// Executes one invocation of one job and keeps the running counters in
/// the job store and the executions ledger balanced around it.
#[derive(Clone)]
pub struct JobExecutor {
    schedule_id: String,
    job_repository: Arc<dyn JobRepository>,
    executions_repository: Arc<dyn ExecutionsRepository>,
}

impl JobExecutor {
    pub fn new(
        schedule_id: impl Into<String>,
        job_repository: Arc<dyn JobRepository>,
        executions_repository: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            job_repository,
            executions_repository,
        }
    }

    /// Run one invocation of `job`.
    ///
    /// The running counters are incremented before the handler runs and
    /// released on every exit path, including handler panics. When a
    /// non-zero cluster cap is already met the invocation is aborted and
    /// reported as [`JobResult::max_running_reached`] without touching
    /// any counter.
    pub async fn execute(&self, job: &Job, handler: &JobHandler) -> Result<JobResult> {
        let name = job.name.as_str();

        if !self
            .job_repository
            .increment_running(name, job.max_running)
            .await?
        {
            tracing::debug!(job = name, max_running = job.max_running, "Max running reached");
            return Ok(JobResult::max_running_reached());
        }

        if let Err(e) = self
            .executions_repository
            .increment_execution(&self.schedule_id, name)
            .await
        {
            // The job counter was already taken; give it back before
            // surfacing the ledger failure.
            self.release_job_counter(name).await;
            return Err(e.into());
        }

        let started = Utc::now();
        let mut info = ExecutionInfo::started(started);
        if let Err(e) = self.job_repository.update_execution_info(name, &info).await {
            tracing::warn!(job = name, error = %e, "Failed to record execution start");
        }

        tracing::debug!(job = name, "Executing job");
        let result = match std::panic::AssertUnwindSafe(handler()).catch_unwind().await {
            Ok(Ok(())) => JobResult::finished(),
            Ok(Err(e)) => JobResult::failed(truncate(&e.to_string())),
            Err(panic) => JobResult::failed(truncate(&panic_message(panic))),
        };

        info.last_finished = Some(Utc::now());
        info.last_result = Some(result.clone());

        let release = self.release(name, &info).await;

        match &result.status {
            crate::job::ExecutionStatus::Finished => {
                tracing::debug!(job = name, "Job finished");
            }
            _ => {
                tracing::warn!(job = name, status = %result.status, error = ?result.error, "Job did not finish cleanly");
            }
        }

        release?;
        Ok(result)
    }

    /// Decrement both counters and write the outcome. Each step is
    /// attempted even when an earlier one fails; the first failure is
    /// reported as unexpected.
    async fn release(&self, name: &str, info: &ExecutionInfo) -> Result<()> {
        let mut first_failure = None;

        if let Err(e) = self.job_repository.decrement_running(name).await {
            first_failure.get_or_insert(e.to_string());
        }
        if let Err(e) = self
            .executions_repository
            .decrement_execution(&self.schedule_id, name)
            .await
        {
            first_failure.get_or_insert(e.to_string());
        }
        if let Err(e) = self.job_repository.update_execution_info(name, info).await {
            first_failure.get_or_insert(e.to_string());
        }

        match first_failure {
            Some(message) => {
                tracing::error!(job = name, error = %message, "Failed to release execution");
                Err(MomoError::Unexpected(message))
            }
            None => Ok(()),
        }
    }

    async fn release_job_counter(&self, name: &str) {
        if let Err(e) = self.job_repository.decrement_running(name).await {
            tracing::error!(job = name, error = %e, "Failed to roll back running counter");
        }
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LENGTH {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LENGTH;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
