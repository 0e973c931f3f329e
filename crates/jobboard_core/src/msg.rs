use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Jobs read from the durable cache at startup.
    CacheLoaded(crate::JobMap),
    /// A job event arrived on the event stream.
    EventReceived {
        event: crate::JobEvent,
        at: DateTime<Utc>,
    },
    /// A poll completed; `requested_at` is when its request was issued.
    SnapshotFetched {
        jobs: crate::JobMap,
        requested_at: DateTime<Utc>,
    },
    /// A poll failed.
    SnapshotFailed {
        error: crate::ApiError,
        at: DateTime<Utc>,
    },
    /// The event stream changed state.
    ConnectionChanged(crate::ConnectionState),
    /// User hid a job from the board.
    JobHidden(crate::JobId),
    /// Periodic housekeeping tick.
    Tick { now: DateTime<Utc> },
}
