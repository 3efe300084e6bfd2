//! Schedule liveness beacon.
//!
//! Every instance heartbeats its ledger entry on a fixed cadence. The
//! active holder of a schedule name is elected through the ledger; an
//! entry that misses two ping intervals is dead and is deleted by the
//! next peer that notices, which is what hands the dead instance's jobs
//! over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::repo::ExecutionsRepository;
use crate::timer::{self, TimerHandle};

/// Nullary callback invoked when this instance becomes the active holder
/// of its schedule name. Passed in at construction so the ping does not
/// hold a reference back to the schedule that owns it.
pub type StartAllCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// An entry is dead once it is older than this many ping intervals.
const DEAD_AFTER_INTERVALS: u32 = 2;

pub struct SchedulePing {
    schedule_id: String,
    schedule_name: String,
    ping_interval: Duration,
    executions_repository: Arc<dyn ExecutionsRepository>,
    start_all: StartAllCallback,
    active: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
    // Held for the duration of one tick so stop can wait out a tick
    // already in flight.
    tick_lock: Arc<Mutex<()>>,
}

impl SchedulePing {
    pub fn new(
        schedule_id: impl Into<String>,
        schedule_name: impl Into<String>,
        ping_interval: Duration,
        executions_repository: Arc<dyn ExecutionsRepository>,
        start_all: StartAllCallback,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            schedule_name: schedule_name.into(),
            ping_interval,
            executions_repository,
            start_all,
            active: AtomicBool::new(false),
            timer: Mutex::new(None),
            tick_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    /// Arm the beacon. The first tick fires immediately, so a fresh
    /// instance claims a vacant schedule name without waiting out a full
    /// ping interval.
    pub async fn start(self: Arc<Self>) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.stop();
        }

        let ping = self.clone();
        *timer = Some(timer::schedule(
            Duration::ZERO,
            self.ping_interval,
            move || {
                let ping = ping.clone();
                async move {
                    let _tick = ping.tick_lock.clone().lock_owned().await;
                    // A fire that raced stop() must not resurrect the
                    // ledger entry stop() just deleted.
                    if ping.timer.lock().await.is_none() {
                        return;
                    }
                    ping.tick().await;
                }
            },
        ));
    }

    /// Stop the beacon, wait out an in-flight tick, and delete the own
    /// ledger entry.
    pub async fn stop(&self) {
        {
            let mut timer = self.timer.lock().await;
            if let Some(handle) = timer.take() {
                handle.stop();
            }
        }
        let _tick = self.tick_lock.lock().await;

        if let Err(e) = self
            .executions_repository
            .delete_one(&self.schedule_id)
            .await
        {
            tracing::error!(
                schedule_id = %self.schedule_id,
                error = %e,
                "Failed to delete schedule entry"
            );
        }
        self.active.store(false, Ordering::SeqCst);
        tracing::debug!(schedule_id = %self.schedule_id, "Schedule ping stopped");
    }

    /// One beacon tick. Store errors are logged and swallowed; the loop
    /// must keep running on a flaky store.
    async fn tick(&self) {
        if let Err(e) = self.try_tick().await {
            tracing::error!(
                schedule_id = %self.schedule_id,
                schedule = %self.schedule_name,
                error = %e,
                "Pinging or cleaning the schedules repository failed"
            );
        }
    }

    async fn try_tick(&self) -> Result<(), crate::error::RepositoryError> {
        let is_active = self
            .executions_repository
            .is_active_schedule(&self.schedule_id, &self.schedule_name)
            .await?;

        let was_active = self.active.swap(is_active, Ordering::SeqCst);
        if is_active && !was_active {
            tracing::info!(
                schedule_id = %self.schedule_id,
                schedule = %self.schedule_name,
                "Became the active schedule, starting all jobs"
            );
            (self.start_all)().await;
        }

        self.executions_repository.ping(&self.schedule_id).await?;

        let dead_threshold = Utc::now()
            - chrono::Duration::from_std(self.ping_interval * DEAD_AFTER_INTERVALS)
                .unwrap_or_else(|_| chrono::Duration::days(1));
        let removed = self
            .executions_repository
            .delete_dead(&self.schedule_name, dead_threshold)
            .await?;
        if removed > 0 {
            tracing::info!(
                schedule = %self.schedule_name,
                removed,
                "Removed dead schedule entries"
            );
        }

        Ok(())
    }
}
