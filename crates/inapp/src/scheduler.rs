//! Delayed work on wall-clock deadlines.
//!
//! Deadlines are wall-clock instants so that work fires on time after the
//! process was suspended: sleeps are cut into slices of at most
//! `wall_clock_check_interval` and the clock is re-read after each slice.

use campaign_core::config::SchedulerConfig;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock driven by tokio's time source, anchored at creation. Under a
/// paused tokio runtime it advances with the virtual time, which makes
/// scheduled work deterministic in tests and simulations.
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.origin);
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.origin_wall.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Handle to a pending piece of work. Cancelling is cooperative and may be
/// done from any task; work that already started runs to completion.
#[derive(Debug, Clone)]
pub struct ScheduledWork {
    token: CancellationToken,
}

impl ScheduledWork {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Clone)]
pub struct WorkScheduler {
    clock: Arc<dyn Clock>,
    check_interval: Duration,
}

impl std::fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

impl WorkScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            check_interval: config.wall_clock_check_interval(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn deadline_after(&self, delay: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Resolves once the wall clock has reached `deadline`.
    pub async fn sleep_until(&self, deadline: DateTime<Utc>) {
        loop {
            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining.min(self.check_interval)).await;
        }
    }

    pub async fn sleep(&self, delay: Duration) {
        self.sleep_until(self.deadline_after(delay)).await;
    }

    /// Runs `work` on a new task once `delay` has elapsed on the wall clock,
    /// unless the returned handle is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, work: F) -> ScheduledWork
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let deadline = self.deadline_after(delay);
        let cancelled = token.clone();
        let scheduler = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    trace!(%deadline, "Scheduled work cancelled");
                }
                _ = scheduler.sleep_until(deadline) => {
                    if !cancelled.is_cancelled() {
                        work.await;
                    }
                }
            }
        });

        ScheduledWork { token }
    }
}
