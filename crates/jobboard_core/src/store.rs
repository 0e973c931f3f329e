use std::collections::BTreeMap;
use std::time::Duration;

use board_logging::{board_debug, board_warn};
use chrono::{DateTime, Utc};

use crate::connection::ConnectionState;
use crate::error::{ApiError, ApiErrorKind};
use crate::event::JobEvent;
use crate::issue::{group_issues, Issue};
use crate::job::{Job, JobId, JobMap};
use crate::view_model::BoardView;

/// Age after which a recorded error is no longer reported.
pub const ERROR_STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable failure; the next poll or reconnect may recover.
    Transient,
    /// No server configured; only a settings change can recover.
    Configuration,
    /// The server rejected or garbled the request.
    Request,
}

impl ErrorClass {
    pub fn of(error: &ApiError) -> Self {
        if error.kind == ApiErrorKind::NotConfigured {
            Self::Configuration
        } else if error.is_retryable() {
            Self::Transient
        } else {
            Self::Request
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub error: ApiError,
    pub at: DateTime<Utc>,
    pub class: ErrorClass,
}

impl ErrorNotice {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.at)
            .to_std()
            .is_ok_and(|age| age >= ERROR_STALE_AFTER)
    }
}

/// Canonical job map plus the bookkeeping needed to reconcile pushed events
/// with polled snapshots.
///
/// Every mutation that changes what a subscriber would see sets the dirty
/// flag; the owner publishes a fresh view after [`JobStore::consume_dirty`]
/// returns `true`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobStore {
    jobs: JobMap,
    last_event_at: BTreeMap<JobId, DateTime<Utc>>,
    connection: ConnectionState,
    last_error: Option<ErrorNotice>,
    dirty: bool,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &JobMap {
        &self.jobs
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Upserts the job an event refers to. Always marks the store dirty.
    pub fn apply_event(&mut self, event: &JobEvent, now: DateTime<Utc>) {
        let id = event.job_id().clone();
        let is_new = !self.jobs.contains_key(&id);
        let job = self
            .jobs
            .entry(id.clone())
            .or_insert_with(|| Job::new(id.clone()));
        let previous = job.status;

        event.job.apply_to(job);
        if event.job.status.is_none() && (is_new || event.kind.is_finish()) {
            if let Some(status) = event.kind.implied_status() {
                job.status = status;
            }
        }
        if event.kind.is_finish() && job.completed_time.is_none() {
            job.completed_time = Some(event.timestamp.unwrap_or(now));
        }
        if !previous.allows_transition(job.status) {
            board_debug!(
                "Job {} moved {} -> {} by {:?} event",
                id,
                previous,
                job.status,
                event.kind
            );
        }

        self.last_event_at.insert(id, now);
        self.clear_error();
        self.dirty = true;
    }

    /// Merges a polled snapshot. Returns whether any job's status or error
    /// changed or a job was added; only then is the store marked dirty.
    ///
    /// Jobs missing from the snapshot are kept. A record is skipped when its
    /// job received an event after `requested_at`, since the event is newer
    /// than anything the request could have seen.
    pub fn apply_snapshot(&mut self, snapshot: JobMap, requested_at: DateTime<Utc>) -> bool {
        let mut changed = false;
        for (id, mut incoming) in snapshot {
            if self
                .last_event_at
                .get(&id)
                .is_some_and(|event_at| *event_at > requested_at)
            {
                board_debug!("Skipping stale snapshot record for job {}", id);
                continue;
            }

            match self.jobs.get_mut(&id) {
                Some(existing) => {
                    if existing.status != incoming.status || existing.error != incoming.error {
                        if !existing.status.allows_transition(incoming.status) {
                            board_debug!(
                                "Job {} moved {} -> {} by snapshot",
                                id,
                                existing.status,
                                incoming.status
                            );
                        }
                        changed = true;
                    }
                    incoming.inherit_missing(existing);
                    *existing = incoming;
                }
                None => {
                    self.jobs.insert(id, incoming);
                    changed = true;
                }
            }
        }

        let had_error = self.clear_error();
        if changed || had_error {
            self.dirty = true;
        }
        changed
    }

    /// Inserts cached jobs whose ids are not known yet.
    pub fn seed(&mut self, jobs: JobMap) -> bool {
        let mut inserted = false;
        for (id, job) in jobs {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.jobs.entry(id) {
                slot.insert(job);
                inserted = true;
            }
        }
        self.dirty |= inserted;
        inserted
    }

    /// Removes a job on explicit request. Nothing else ever evicts.
    pub fn hide(&mut self, id: &JobId) -> bool {
        self.last_event_at.remove(id);
        let removed = self.jobs.remove(id).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn record_error(&mut self, error: ApiError, at: DateTime<Utc>) {
        let class = ErrorClass::of(&error);
        board_warn!("Job board error ({:?}): {}", class, error);
        self.last_error = Some(ErrorNotice { error, at, class });
        self.dirty = true;
    }

    /// The last error, unless it is older than [`ERROR_STALE_AFTER`].
    pub fn last_error(&self, now: DateTime<Utc>) -> Option<&ErrorNotice> {
        self.last_error
            .as_ref()
            .filter(|notice| !notice.is_stale(now))
    }

    /// Drops a stale error. Returns whether one was dropped.
    pub fn expire_error(&mut self, now: DateTime<Utc>) -> bool {
        if self.last_error.as_ref().is_some_and(|n| n.is_stale(now)) {
            self.last_error = None;
            self.dirty = true;
            return true;
        }
        false
    }

    pub fn set_connection(&mut self, state: ConnectionState) -> bool {
        if self.connection == state {
            return false;
        }
        if !self.connection.can_transition_to(state) {
            board_warn!(
                "Unexpected connection transition {} -> {}",
                self.connection,
                state
            );
        }
        self.connection = state;
        self.dirty = true;
        true
    }

    /// Jobs ordered by start time, most recent first. Jobs without a start
    /// time come last; ties are ordered by id.
    pub fn sorted_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| match (a.start_time, b.start_time) {
            (Some(a_start), Some(b_start)) => b_start.cmp(&a_start).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        jobs
    }

    pub fn issues(&self) -> Vec<Issue> {
        group_issues(self.sorted_jobs())
    }

    pub fn view(&self, now: DateTime<Utc>) -> BoardView {
        BoardView {
            jobs: self.sorted_jobs().into_iter().cloned().collect(),
            issues: self.issues(),
            connection: self.connection,
            last_error: self.last_error(now).cloned(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns whether the store changed since the last call and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn clear_error(&mut self) -> bool {
        self.last_error.take().is_some()
    }
}
