//! Single-shot-then-periodic timer.
//!
//! A job's calendar is "run first at `t0 + delay`, then every `period`".
//! A plain periodic timer starting now would skew the first fire, so the
//! timer here sleeps once for the initial delay and only then settles
//! into its cadence.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running timer. Dropping the handle does not stop the timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Prevent any further fires. Idempotent; an action already in
    /// flight runs to completion.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Invoke `action` once after `delay`, then every `period`, until stopped.
///
/// The timer never queues: if an action outlives `period`, the missed
/// fires are skipped and the next fire stays on the original cadence.
pub fn schedule<F, Fut>(delay: Duration, period: Duration, action: F) -> TimerHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let timer_token = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = timer_token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        // The first tick of a tokio interval completes immediately,
        // which is exactly the fire owed after the initial delay.
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            action().await;
        }
    });

    TimerHandle { token }
}
