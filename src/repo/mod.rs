//! Store contracts shared by all schedule instances.
//!
//! The job store and the executions ledger are the only shared state in
//! the cluster; all cross-instance coordination flows through them. The
//! traits here are the seam a document-store driver plugs into;
//! [`memory`] holds the reference implementations.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::job::{ExecutionInfo, Job};

pub use memory::{InMemoryExecutionsRepository, InMemoryJobRepository};

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Shared record of job definitions, keyed by unique job name.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_one(&self, name: &str) -> RepoResult<Option<Job>>;

    /// Upsert a definition by name.
    async fn save(&self, job: &Job) -> RepoResult<()>;

    async fn delete(&self, name: &str) -> RepoResult<()>;

    async fn list(&self) -> RepoResult<Vec<Job>>;

    /// Atomically increment the job's running counter, unless a non-zero
    /// `max_running` cap is already met — then nothing is written and
    /// `false` is returned. The check and the increment are one store
    /// operation, so the cap cannot be overshot through this call; across
    /// instances it remains a soft ceiling (peers may observe stale
    /// counts between their own check and increment).
    async fn increment_running(&self, name: &str, max_running: u32) -> RepoResult<bool>;

    async fn decrement_running(&self, name: &str) -> RepoResult<()>;

    async fn update_execution_info(&self, name: &str, info: &ExecutionInfo) -> RepoResult<()>;
}

/// A schedule instance's record in the executions ledger.
///
/// `registered_at` is fixed when the entry is (re)created and is what
/// the election orders by; `last_alive` is rewritten by every heartbeat
/// and only decides liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub last_alive: DateTime<Utc>,
    pub executions: HashMap<String, u32>,
}

impl ScheduleEntry {
    pub fn new(schedule_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schedule_id: schedule_id.into(),
            name: name.into(),
            registered_at: now,
            last_alive: now,
            executions: HashMap::new(),
        }
    }
}

/// Shared record of live schedule instances and their per-job running
/// counts.
#[async_trait]
pub trait ExecutionsRepository: Send + Sync {
    /// Create (or refresh) the entry for a schedule instance.
    async fn add_schedule(&self, schedule_id: &str, name: &str) -> RepoResult<()>;

    /// Whether `schedule_id` is the active holder of the schedule `name`.
    ///
    /// Among entries for `name` whose `last_alive` is within the liveness
    /// window, the winner has the oldest `registered_at`, ties broken by
    /// lexicographic `schedule_id`. Ordering by the fixed registration
    /// time keeps the election independent of heartbeat phase: a live
    /// holder is never displaced just because a passive peer happened to
    /// ping more recently. When no live entry exists the caller claims
    /// ownership by writing its own entry. The read and the claim are
    /// not one atomic operation: two racing instances may both
    /// transiently observe themselves active, which is tolerated because
    /// starting jobs is idempotent and the cluster cap still bounds
    /// executions.
    async fn is_active_schedule(&self, schedule_id: &str, name: &str) -> RepoResult<bool>;

    /// Heartbeat: set the entry's `last_alive` to now.
    async fn ping(&self, schedule_id: &str) -> RepoResult<()>;

    async fn delete_one(&self, schedule_id: &str) -> RepoResult<()>;

    /// Delete entries for `name` whose `last_alive` is older than
    /// `older_than`; returns how many were removed. This is how takeover
    /// of a dead peer's jobs happens.
    async fn delete_dead(&self, name: &str, older_than: DateTime<Utc>) -> RepoResult<u64>;

    /// Sum of running executions of `job_name` across all schedule
    /// entries.
    async fn count_running(&self, job_name: &str) -> RepoResult<u64>;

    async fn increment_execution(&self, schedule_id: &str, job_name: &str) -> RepoResult<()>;

    async fn decrement_execution(&self, schedule_id: &str, job_name: &str) -> RepoResult<()>;
}
