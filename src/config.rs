use std::sync::Arc;
use std::time::Duration;

use crate::repo::{
    ExecutionsRepository, InMemoryExecutionsRepository, InMemoryJobRepository, JobRepository,
};

/// Default heartbeat cadence of the schedule liveness beacon.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a schedule instance needs to come up: its logical name,
/// the ping cadence, and the two shared stores. The stores are explicit
/// dependencies; there is no process-wide connection state.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub schedule_name: String,
    pub ping_interval: Duration,
    pub job_repository: Arc<dyn JobRepository>,
    pub executions_repository: Arc<dyn ExecutionsRepository>,
}

impl ConnectionOptions {
    pub fn new(
        schedule_name: impl Into<String>,
        job_repository: Arc<dyn JobRepository>,
        executions_repository: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        Self {
            schedule_name: schedule_name.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            job_repository,
            executions_repository,
        }
    }

    /// Single-process setup backed by the in-memory stores. The ledger's
    /// liveness window is twice the ping interval.
    pub fn in_memory(schedule_name: impl Into<String>) -> Self {
        Self::in_memory_with_ping_interval(schedule_name, DEFAULT_PING_INTERVAL)
    }

    pub fn in_memory_with_ping_interval(
        schedule_name: impl Into<String>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            schedule_name: schedule_name.into(),
            ping_interval,
            job_repository: Arc::new(InMemoryJobRepository::new()),
            executions_repository: Arc::new(InMemoryExecutionsRepository::new(ping_interval * 2)),
        }
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }
}
