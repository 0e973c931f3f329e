use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use board_logging::{board_debug, board_info};
use chrono::{DateTime, Utc};
use jobboard_core::{ApiError, JobMap};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::sink::EventSink;

/// Smallest accepted poll interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<JobMap, ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Snapshot {
        jobs: JobMap,
        /// When the request was issued, not when it completed.
        requested_at: DateTime<Utc>,
    },
    Failed {
        error: ApiError,
        at: DateTime<Utc>,
    },
}

struct Schedule {
    token: CancellationToken,
    interval: Duration,
}

/// Timer-driven full-snapshot fetcher.
///
/// Ticks never queue behind a slow request: every tick starts its own fetch.
/// Results that arrive after [`PollScheduler::stop`] are discarded.
pub struct PollScheduler {
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn EventSink<PollOutcome>>,
    shutdown: CancellationToken,
    schedule: Mutex<Option<Schedule>>,
}

impl PollScheduler {
    pub fn new(source: Arc<dyn SnapshotSource>, sink: Arc<dyn EventSink<PollOutcome>>) -> Self {
        Self {
            source,
            sink,
            shutdown: CancellationToken::new(),
            schedule: Mutex::new(None),
        }
    }

    /// Ties every schedule to `shutdown`: once it is cancelled, `start` is a
    /// no-op and running schedules stop.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Fetches immediately, then every `interval`. Replaces any running
    /// schedule. Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut schedule = self.lock_schedule();
        if let Some(previous) = schedule.take() {
            previous.token.cancel();
        }

        if self.shutdown.is_cancelled() {
            board_debug!("Ignoring poll start after shutdown");
            return;
        }
        let token = self.shutdown.child_token();
        *schedule = Some(Schedule {
            token: token.clone(),
            interval,
        });
        board_info!("Polling every {:?}", interval);

        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::spawn(fetch_once(
                    Arc::clone(&source),
                    Arc::clone(&sink),
                    token.clone(),
                ));
            }
        });
    }

    pub fn stop(&self) {
        if let Some(schedule) = self.lock_schedule().take() {
            schedule.token.cancel();
            board_info!("Polling stopped");
        }
    }

    /// Interval of the running schedule, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.lock_schedule().as_ref().map(|s| s.interval)
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<Schedule>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(schedule) = self.lock_schedule().take() {
            schedule.token.cancel();
        }
    }
}

async fn fetch_once(
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn EventSink<PollOutcome>>,
    token: CancellationToken,
) {
    let requested_at = Utc::now();
    let result = source.fetch_snapshot().await;
    if token.is_cancelled() {
        board_debug!("Discarding poll result that finished after stop");
        return;
    }
    let outcome = match result {
        Ok(jobs) => PollOutcome::Snapshot { jobs, requested_at },
        Err(error) => PollOutcome::Failed {
            error,
            at: Utc::now(),
        },
    };
    sink.emit(outcome);
}
