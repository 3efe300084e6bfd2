pub mod executor;
pub mod scheduler;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use executor::JobExecutor;
pub use scheduler::JobScheduler;

/// Handler failures travel as boxed errors, the common currency of the
/// async ecosystem.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The callable a job runs on every invocation. The store only records
/// the job definition; the handler itself lives in-process, keyed by
/// the job name.
pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Outcome classification of a single job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Finished,
    Failed,
    NotFound,
    MaxRunningReached,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Finished => write!(f, "finished"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::NotFound => write!(f, "notFound"),
            ExecutionStatus::MaxRunningReached => write!(f, "maxRunningReached"),
        }
    }
}

/// Result of one job invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl JobResult {
    pub fn finished() -> Self {
        Self {
            status: ExecutionStatus::Finished,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ExecutionStatus::NotFound,
            error: None,
        }
    }

    pub fn max_running_reached() -> Self {
        Self {
            status: ExecutionStatus::MaxRunningReached,
            error: None,
        }
    }
}

/// Timestamps and outcome of the most recent execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub last_started: DateTime<Utc>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_result: Option<JobResult>,
}

impl ExecutionInfo {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            last_started: at,
            last_finished: None,
            last_result: None,
        }
    }
}

/// A job definition as persisted in the job store, keyed by unique name.
///
/// `running` is the cluster-wide count of in-flight invocations and is
/// maintained by executors, not by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub interval: String,
    pub concurrency: u32,
    pub max_running: u32,
    pub running: u32,
    pub immediate: bool,
    pub execution_info: Option<ExecutionInfo>,
}

impl Job {
    pub fn new(name: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: interval.into(),
            concurrency: 1,
            max_running: 0,
            running: 0,
            immediate: false,
            execution_info: None,
        }
    }

    /// How many invocations one tick may launch on a single instance.
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Cluster-wide cap on in-flight invocations; 0 means unbounded.
    pub fn with_max_running(mut self, max_running: u32) -> Self {
        self.max_running = max_running;
        self
    }

    /// Fire the first tick as soon as scheduling starts.
    pub fn run_immediately(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn last_finished(&self) -> Option<DateTime<Utc>> {
        self.execution_info.as_ref().and_then(|info| info.last_finished)
    }
}
