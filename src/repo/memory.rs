//! In-memory reference implementations of the store contracts.
//!
//! These back the test suite and embedded single-process use. A
//! document-store driver implementing the same traits drops in for
//! multi-process deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::RepositoryError;
use crate::job::{ExecutionInfo, Job};
use crate::repo::{ExecutionsRepository, JobRepository, RepoResult, ScheduleEntry};

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_one(&self, name: &str) -> RepoResult<Option<Job>> {
        Ok(self.jobs.read().await.get(name).cloned())
    }

    async fn save(&self, job: &Job) -> RepoResult<()> {
        self.jobs
            .write()
            .await
            .insert(job.name.clone(), job.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> RepoResult<()> {
        self.jobs.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> RepoResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn increment_running(&self, name: &str, max_running: u32) -> RepoResult<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| RepositoryError::new(format!("no job named '{name}'")))?;
        if max_running > 0 && job.running >= max_running {
            return Ok(false);
        }
        job.running += 1;
        Ok(true)
    }

    async fn decrement_running(&self, name: &str) -> RepoResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| RepositoryError::new(format!("no job named '{name}'")))?;
        job.running = job.running.saturating_sub(1);
        Ok(())
    }

    async fn update_execution_info(&self, name: &str, info: &ExecutionInfo) -> RepoResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| RepositoryError::new(format!("no job named '{name}'")))?;
        job.execution_info = Some(info.clone());
        Ok(())
    }
}

/// Executions ledger over a map keyed by schedule id.
///
/// The liveness window decides which entries count for the active-holder
/// election; `connect` wires it to twice the ping interval.
#[derive(Debug)]
pub struct InMemoryExecutionsRepository {
    entries: RwLock<HashMap<String, ScheduleEntry>>,
    liveness_window: Duration,
}

impl InMemoryExecutionsRepository {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }
}

#[async_trait]
impl ExecutionsRepository for InMemoryExecutionsRepository {
    async fn add_schedule(&self, schedule_id: &str, name: &str) -> RepoResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            schedule_id.to_string(),
            ScheduleEntry::new(schedule_id, name),
        );
        Ok(())
    }

    async fn is_active_schedule(&self, schedule_id: &str, name: &str) -> RepoResult<bool> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.liveness_window)
                .map_err(|e| RepositoryError::new(e.to_string()))?;

        let mut entries = self.entries.write().await;
        let winner = entries
            .values()
            .filter(|e| e.name == name && e.last_alive >= threshold)
            .min_by(|a, b| {
                a.registered_at
                    .cmp(&b.registered_at)
                    .then_with(|| a.schedule_id.cmp(&b.schedule_id))
            })
            .map(|e| e.schedule_id.clone());

        match winner {
            Some(id) => Ok(id == schedule_id),
            None => {
                // Nobody alive holds the name; claim it.
                entries.insert(
                    schedule_id.to_string(),
                    ScheduleEntry::new(schedule_id, name),
                );
                Ok(true)
            }
        }
    }

    async fn ping(&self, schedule_id: &str) -> RepoResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(schedule_id)
            .ok_or_else(|| RepositoryError::new(format!("no schedule entry '{schedule_id}'")))?;
        entry.last_alive = Utc::now();
        Ok(())
    }

    async fn delete_one(&self, schedule_id: &str) -> RepoResult<()> {
        self.entries.write().await.remove(schedule_id);
        Ok(())
    }

    async fn delete_dead(&self, name: &str, older_than: DateTime<Utc>) -> RepoResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.name != name || e.last_alive >= older_than);
        Ok((before - entries.len()) as u64)
    }

    async fn count_running(&self, job_name: &str) -> RepoResult<u64> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .map(|e| u64::from(*e.executions.get(job_name).unwrap_or(&0)))
            .sum())
    }

    async fn increment_execution(&self, schedule_id: &str, job_name: &str) -> RepoResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(schedule_id)
            .ok_or_else(|| RepositoryError::new(format!("no schedule entry '{schedule_id}'")))?;
        *entry.executions.entry(job_name.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn decrement_execution(&self, schedule_id: &str, job_name: &str) -> RepoResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(schedule_id)
            .ok_or_else(|| RepositoryError::new(format!("no schedule entry '{schedule_id}'")))?;
        if let Some(count) = entry.executions.get_mut(job_name) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }
}
