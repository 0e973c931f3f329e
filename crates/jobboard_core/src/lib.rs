//! Job board core: pure reconciliation state machine and view-model helpers.
mod connection;
mod effect;
mod error;
mod event;
mod issue;
mod job;
mod msg;
mod record;
mod snapshot;
mod store;
mod update;
mod view_model;

pub use connection::ConnectionState;
pub use effect::{Effect, PollMode};
pub use error::{ApiError, ApiErrorKind};
pub use event::{
    decode_event_frame, decode_job_stream_frame, FrameError, JobEvent, JobEventKind,
    JobStreamFrame,
};
pub use issue::{group_issues, BoardColumn, Issue, IssueKey};
pub use job::{Job, JobCost, JobId, JobMap, JobStatus};
pub use msg::Msg;
pub use record::{parse_timestamp, JobPatch};
pub use snapshot::parse_status_response;
pub use store::{ErrorClass, ErrorNotice, JobStore, ERROR_STALE_AFTER};
pub use update::update;
pub use view_model::BoardView;
