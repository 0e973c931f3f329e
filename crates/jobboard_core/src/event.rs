use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::job::{normalize_token, JobId, JobStatus};
use crate::record::{parse_timestamp, JobPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    JobCreated,
    JobStatusChanged,
    JobCompleted,
    JobFailed,
    Unknown,
}

impl JobEventKind {
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "jobcreated" => Self::JobCreated,
            "jobstatuschanged" => Self::JobStatusChanged,
            "jobcompleted" => Self::JobCompleted,
            "jobfailed" => Self::JobFailed,
            _ => Self::Unknown,
        }
    }

    /// Status the event implies when its payload carries none.
    pub fn implied_status(self) -> Option<JobStatus> {
        match self {
            Self::JobCreated => Some(JobStatus::Pending),
            Self::JobCompleted => Some(JobStatus::Completed),
            Self::JobFailed => Some(JobStatus::Failed),
            Self::JobStatusChanged | Self::Unknown => None,
        }
    }

    pub fn is_finish(self) -> bool {
        matches!(self, Self::JobCompleted | Self::JobFailed)
    }
}

/// Server-pushed notification of a single job's state change.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub job: JobPatch,
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }
}

/// Non-protocol frame from a per-job stream (log lines, tool use, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct JobStreamFrame {
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(String),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame carries no job id")]
    MissingJobId,
}

/// Decodes one frame of the global event stream.
///
/// Returns `Ok(None)` for protocol frames (`connected`, `pong`).
pub fn decode_event_frame(text: &str) -> Result<Option<JobEvent>, FrameError> {
    let value = parse_object(text)?;
    let kind_raw = frame_type(&value);
    if is_protocol_frame(kind_raw) {
        return Ok(None);
    }

    let top_level_id = value
        .get("job_id")
        .or_else(|| value.get("jobId"))
        .and_then(Value::as_str);
    let record = value.get("job").filter(|job| job.is_object()).unwrap_or(&value);
    let job = JobPatch::from_value(record, top_level_id).ok_or(FrameError::MissingJobId)?;

    Ok(Some(JobEvent {
        kind: JobEventKind::parse(kind_raw),
        timestamp: value.get("timestamp").and_then(parse_timestamp),
        job,
    }))
}

/// Decodes one frame of a per-job stream.
///
/// Returns `Ok(None)` for protocol frames (`connected`, `pong`).
pub fn decode_job_stream_frame(text: &str) -> Result<Option<JobStreamFrame>, FrameError> {
    let value = parse_object(text)?;
    let kind = frame_type(&value);
    if is_protocol_frame(kind) {
        return Ok(None);
    }
    let kind = if kind.is_empty() { "message" } else { kind }.to_string();
    Ok(Some(JobStreamFrame {
        kind,
        payload: value,
    }))
}

fn parse_object(text: &str) -> Result<Value, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| FrameError::InvalidJson(err.to_string()))?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    Ok(value)
}

fn frame_type(value: &Value) -> &str {
    value.get("type").and_then(Value::as_str).unwrap_or("")
}

fn is_protocol_frame(kind: &str) -> bool {
    matches!(normalize_token(kind).as_str(), "connected" | "pong")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protocol_frames_are_swallowed() {
        assert_eq!(decode_event_frame(r#"{"type":"connected"}"#), Ok(None));
        assert_eq!(decode_event_frame(r#"{"type":"pong"}"#), Ok(None));
        assert_eq!(decode_job_stream_frame(r#"{"type":"PONG"}"#), Ok(None));
    }

    #[test]
    fn business_frame_becomes_event() {
        let frame = json!({
            "type": "job_completed",
            "timestamp": "2024-05-01T10:00:00Z",
            "job": {"id": "a", "status": "completed"}
        });
        let event = decode_event_frame(&frame.to_string()).unwrap().unwrap();
        assert_eq!(event.kind, JobEventKind::JobCompleted);
        assert_eq!(event.job_id().as_str(), "a");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn camel_case_kinds_parse_and_unknown_kinds_survive() {
        let event = decode_event_frame(r#"{"type":"jobStatusChanged","job":{"id":"b"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, JobEventKind::JobStatusChanged);

        let event = decode_event_frame(r#"{"type":"job_teleported","job":{"id":"b"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, JobEventKind::Unknown);
    }

    #[test]
    fn flat_frames_use_top_level_job_id() {
        let event = decode_event_frame(r#"{"type":"job_failed","job_id":"c","error":"oom"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id().as_str(), "c");
        assert_eq!(event.job.error, Some(Some("oom".to_string())));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_event_frame("{not json"),
            Err(FrameError::InvalidJson(_))
        ));
        assert_eq!(decode_event_frame("[1,2]"), Err(FrameError::NotAnObject));
        assert_eq!(
            decode_event_frame(r#"{"type":"job_created","job":{"status":"pending"}}"#),
            Err(FrameError::MissingJobId)
        );
    }

    #[test]
    fn job_stream_frames_keep_payload() {
        let frame = decode_job_stream_frame(r#"{"type":"log","line":"hello"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, "log");
        assert_eq!(frame.payload["line"], "hello");

        let untyped = decode_job_stream_frame(r#"{"line":"x"}"#).unwrap().unwrap();
        assert_eq!(untyped.kind, "message");
    }
}
