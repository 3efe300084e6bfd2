//! A schedule instance: the set of job schedulers co-located in one
//! process, plus the liveness beacon that competes for ownership of the
//! schedule name.

pub mod ping;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::ConnectionOptions;
use crate::error::{MomoError, Result};
use crate::interval::parse_interval;
use crate::job::{ExecutionInfo, Job, JobExecutor, JobHandler, JobResult, JobScheduler};
use crate::repo::{ExecutionsRepository, JobRepository};
use crate::schedule::ping::SchedulePing;

/// Live scheduling state of a started job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub interval_ms: u64,
    /// Cluster-wide running count, read from the executions ledger.
    pub running: u64,
}

/// A job definition plus, when started on this instance, its live
/// scheduling status.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescription {
    pub name: String,
    pub interval: String,
    pub concurrency: u32,
    pub max_running: u32,
    pub immediate: bool,
    pub execution_info: Option<ExecutionInfo>,
    pub status: Option<SchedulerStatus>,
}

type SchedulerMap = Arc<RwLock<HashMap<String, Arc<JobScheduler>>>>;

/// One schedule instance. Create with [`Schedule::connect`].
pub struct Schedule {
    schedule_id: String,
    schedule_name: String,
    job_repository: Arc<dyn JobRepository>,
    executions_repository: Arc<dyn ExecutionsRepository>,
    schedulers: SchedulerMap,
    defining: Mutex<HashSet<String>>,
    ping: Arc<SchedulePing>,
}

impl Schedule {
    /// Bring up a schedule instance: register it in the executions
    /// ledger under a fresh schedule id and start its liveness beacon.
    /// Jobs start running once the beacon observes this instance as the
    /// active holder of the schedule name.
    pub async fn connect(options: ConnectionOptions) -> Result<Schedule> {
        let schedule_id = Uuid::new_v4().to_string();
        let schedulers: SchedulerMap = Arc::new(RwLock::new(HashMap::new()));

        options
            .executions_repository
            .add_schedule(&schedule_id, &options.schedule_name)
            .await?;

        // The ping holds a callback over the scheduler set, not a
        // reference back to this Schedule.
        let callback_schedulers = schedulers.clone();
        let ping = Arc::new(SchedulePing::new(
            schedule_id.clone(),
            options.schedule_name.clone(),
            options.ping_interval,
            options.executions_repository.clone(),
            Arc::new(move || {
                let schedulers = callback_schedulers.clone();
                Box::pin(async move {
                    start_all(&schedulers).await;
                })
            }),
        ));
        ping.clone().start().await;

        tracing::info!(
            schedule_id = %schedule_id,
            schedule = %options.schedule_name,
            "Schedule connected"
        );

        Ok(Schedule {
            schedule_id,
            schedule_name: options.schedule_name,
            job_repository: options.job_repository,
            executions_repository: options.executions_repository,
            schedulers,
            defining: Mutex::new(HashSet::new()),
            ping,
        })
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    pub fn schedule_name(&self) -> &str {
        &self.schedule_name
    }

    /// Validate and upsert a job definition and register its handler.
    ///
    /// A previously defined job of the same name is fully replaced: its
    /// scheduler is stopped and drained before the new one becomes
    /// callable. The stored running counter and execution info survive
    /// redefinition; they belong to the executors.
    pub async fn define_job(&self, job: Job, handler: JobHandler) -> Result<()> {
        parse_interval(&job.interval)?;
        if job.concurrency == 0 {
            return Err(MomoError::InvalidConcurrency {
                name: job.name,
                value: 0,
            });
        }

        let name = job.name.clone();
        {
            let mut defining = self.defining.lock().await;
            if !defining.insert(name.clone()) {
                return Err(MomoError::JobAlreadyScheduled(name));
            }
        }

        let result = self.define_job_inner(job, handler).await;
        self.defining.lock().await.remove(&name);
        result
    }

    async fn define_job_inner(&self, mut job: Job, handler: JobHandler) -> Result<()> {
        let name = job.name.clone();

        let previous = self.schedulers.write().await.remove(&name);
        if let Some(previous) = previous {
            previous.stop().await;
        }

        if let Some(stored) = self.job_repository.find_one(&name).await? {
            job.running = stored.running;
            job.execution_info = stored.execution_info;
        }
        self.job_repository.save(&job).await?;

        let scheduler = Arc::new(JobScheduler::new(
            name.clone(),
            handler,
            JobExecutor::new(
                self.schedule_id.clone(),
                self.job_repository.clone(),
                self.executions_repository.clone(),
            ),
            self.job_repository.clone(),
        ));
        self.schedulers.write().await.insert(name.clone(), scheduler);

        tracing::debug!(job = %name, "Job defined");
        Ok(())
    }

    /// Stop the job's scheduler (draining pending executions) and delete
    /// the stored definition.
    pub async fn remove_job(&self, name: &str) -> Result<()> {
        let scheduler = self.schedulers.write().await.remove(name);
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.job_repository.delete(name).await?;
        tracing::debug!(job = %name, "Job removed");
        Ok(())
    }

    /// Start scheduling the named job.
    pub async fn start_job(&self, name: &str) -> Result<()> {
        let scheduler = self
            .scheduler(name)
            .await
            .ok_or_else(|| MomoError::JobNotFound(name.to_string()))?;
        scheduler.start().await
    }

    /// Start every locally defined job. Individual failures are logged;
    /// one broken definition must not keep the rest from starting.
    pub async fn start_all_jobs(&self) {
        start_all(&self.schedulers).await;
    }

    /// Stop scheduling the named job and await its pending executions.
    pub async fn stop_job(&self, name: &str) -> Result<()> {
        let scheduler = self
            .scheduler(name)
            .await
            .ok_or_else(|| MomoError::JobNotFound(name.to_string()))?;
        scheduler.stop().await;
        Ok(())
    }

    /// Stop all jobs in parallel; resolves once every pending execution
    /// has settled.
    pub async fn stop_all_jobs(&self) {
        let schedulers: Vec<Arc<JobScheduler>> =
            self.schedulers.read().await.values().cloned().collect();
        futures::future::join_all(schedulers.iter().map(|s| s.stop())).await;
    }

    /// Stop all jobs and forget them locally. The stored definitions are
    /// left untouched.
    pub async fn cancel(&self) {
        self.stop_all_jobs().await;
        self.schedulers.write().await.clear();
    }

    /// Run the named job once, bypassing its timer.
    pub async fn run(&self, name: &str) -> Result<JobResult> {
        match self.scheduler(name).await {
            Some(scheduler) => scheduler.execute_once().await,
            None => Ok(JobResult::not_found()),
        }
    }

    /// Describe one stored job.
    pub async fn get(&self, name: &str) -> Result<Option<JobDescription>> {
        match self.job_repository.find_one(name).await? {
            Some(job) => Ok(Some(self.describe(job).await?)),
            None => Ok(None),
        }
    }

    /// Describe all stored jobs.
    pub async fn list(&self) -> Result<Vec<JobDescription>> {
        let mut descriptions = Vec::new();
        for job in self.job_repository.list().await? {
            descriptions.push(self.describe(job).await?);
        }
        Ok(descriptions)
    }

    /// Number of locally known jobs, optionally only the started ones.
    pub async fn count(&self, started_only: bool) -> usize {
        let schedulers: Vec<Arc<JobScheduler>> =
            self.schedulers.read().await.values().cloned().collect();
        if !started_only {
            return schedulers.len();
        }
        let mut count = 0;
        for scheduler in schedulers {
            if scheduler.is_started().await {
                count += 1;
            }
        }
        count
    }

    /// Errors that escaped the periodic loops of all local schedulers.
    pub async fn unexpected_error_count(&self) -> u64 {
        self.schedulers
            .read()
            .await
            .values()
            .map(|s| s.unexpected_error_count())
            .sum()
    }

    /// Tear down the instance: stop all jobs, draining their pending
    /// executions, then stop the beacon and remove the ledger entry.
    /// Draining first keeps the entry around for the executors still
    /// releasing their counters against it.
    pub async fn disconnect(&self) {
        self.cancel().await;
        self.ping.stop().await;
        tracing::info!(schedule_id = %self.schedule_id, "Schedule disconnected");
    }

    async fn scheduler(&self, name: &str) -> Option<Arc<JobScheduler>> {
        self.schedulers.read().await.get(name).cloned()
    }

    async fn describe(&self, job: Job) -> Result<JobDescription> {
        let status = match self.scheduler(&job.name).await {
            Some(scheduler) => match scheduler.interval_ms().await {
                Some(interval_ms) => Some(SchedulerStatus {
                    interval_ms,
                    running: self.executions_repository.count_running(&job.name).await?,
                }),
                None => None,
            },
            None => None,
        };
        Ok(JobDescription {
            name: job.name,
            interval: job.interval,
            concurrency: job.concurrency,
            max_running: job.max_running,
            immediate: job.immediate,
            execution_info: job.execution_info,
            status,
        })
    }
}

async fn start_all(schedulers: &SchedulerMap) {
    let schedulers: Vec<Arc<JobScheduler>> = schedulers.read().await.values().cloned().collect();
    for scheduler in schedulers {
        if let Err(e) = scheduler.clone().start().await {
            tracing::error!(job = %scheduler.job_name(), error = %e, "Failed to start job");
        }
    }
}
