use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::job::{Job, JobCost, JobId, JobStatus};

const ID_FIELDS: &[&str] = &["id", "job_id", "jobId"];
const REPO_FIELDS: &[&str] = &["repo", "repository"];
const ISSUE_NUMBER_FIELDS: &[&str] = &["issue_number", "issueNumber", "issue"];
const ISSUE_TITLE_FIELDS: &[&str] = &["issue_title", "issueTitle", "title"];
const COMMAND_FIELDS: &[&str] = &["command", "job_type", "jobType"];
const STATUS_FIELDS: &[&str] = &["status", "state"];
const START_FIELDS: &[&str] = &["start_time", "startTime", "started_at", "created_at"];
const COMPLETED_FIELDS: &[&str] = &["completed_time", "completedTime", "completed_at", "finished_at"];
const COST_FIELDS: &[&str] = &["cost", "usage"];
const ERROR_FIELDS: &[&str] = &["error", "error_message"];

/// Partial job fields decoded from a server record or stream event.
///
/// `None` means "not present in the payload". `error` distinguishes an absent
/// field (`None`) from an explicit `null` (`Some(None)`), which clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPatch {
    pub id: JobId,
    pub repo: Option<String>,
    pub issue_number: Option<u64>,
    pub issue_title: Option<String>,
    pub command: Option<String>,
    pub status: Option<JobStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub cost: Option<JobCost>,
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            repo: None,
            issue_number: None,
            issue_title: None,
            command: None,
            status: None,
            start_time: None,
            completed_time: None,
            cost: None,
            error: None,
        }
    }

    /// Decodes a JSON record leniently. Returns `None` only when the value is
    /// not an object or no id can be found; `fallback_id` supplies the id for
    /// records keyed by id in an enclosing object.
    pub fn from_value(value: &Value, fallback_id: Option<&str>) -> Option<Self> {
        let obj = value.as_object()?;
        let id = string_field(obj, ID_FIELDS)
            .or_else(|| fallback_id.map(ToOwned::to_owned))
            .filter(|id| !id.is_empty())?;

        Some(Self {
            id: JobId::new(id),
            repo: string_field(obj, REPO_FIELDS),
            issue_number: u64_field(obj, ISSUE_NUMBER_FIELDS),
            issue_title: string_field(obj, ISSUE_TITLE_FIELDS),
            command: string_field(obj, COMMAND_FIELDS),
            status: string_field(obj, STATUS_FIELDS).map(|raw| JobStatus::parse(&raw)),
            start_time: present(obj, START_FIELDS).and_then(parse_timestamp),
            completed_time: present(obj, COMPLETED_FIELDS).and_then(parse_timestamp),
            cost: present(obj, COST_FIELDS).and_then(parse_cost),
            error: error_field(obj),
        })
    }

    /// Overwrites the fields of `job` that this patch carries.
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(repo) = &self.repo {
            job.repo.clone_from(repo);
        }
        if let Some(number) = self.issue_number {
            job.issue_number = number;
        }
        if let Some(title) = &self.issue_title {
            job.issue_title.clone_from(title);
        }
        if let Some(command) = &self.command {
            job.command.clone_from(command);
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if self.start_time.is_some() {
            job.start_time = self.start_time;
        }
        if self.completed_time.is_some() {
            job.completed_time = self.completed_time;
        }
        if self.cost.is_some() {
            job.cost = self.cost;
        }
        if let Some(error) = &self.error {
            job.error.clone_from(error);
        }
    }

    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.id.clone());
        self.apply_to(&mut job);
        job
    }
}

/// Parses RFC 3339, naive ISO 8601 (taken as UTC) or epoch seconds.
/// Epoch values above 10^12 are taken as milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                    return Some(naive.and_utc());
                }
            }
            raw.parse::<f64>().ok().and_then(from_epoch)
        }
        Value::Number(number) => number.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > 1e12 { value } else { value * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64)
}

fn present<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|value| !value.is_null())
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match present(obj, names)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn u64_field(obj: &Map<String, Value>, names: &[&str]) -> Option<u64> {
    match present(obj, names)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}

fn error_field(obj: &Map<String, Value>) -> Option<Option<String>> {
    let value = ERROR_FIELDS.iter().find_map(|name| obj.get(*name))?;
    Some(match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn parse_cost(value: &Value) -> Option<JobCost> {
    match value {
        Value::Number(n) => Some(JobCost {
            tokens: None,
            usd: n.as_f64(),
        }),
        Value::Object(obj) => {
            let tokens = u64_field(obj, &["tokens", "total_tokens"]);
            let usd = present(obj, &["usd", "cost_usd", "total_cost_usd", "dollars"])
                .and_then(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
                    _ => None,
                });
            (tokens.is_some() || usd.is_some()).then_some(JobCost { tokens, usd })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn decodes_aliased_fields() {
        let patch = JobPatch::from_value(
            &json!({
                "jobId": "j-1",
                "repo": "acme/widgets",
                "issueNumber": "42",
                "issueTitle": "Fix the widget",
                "command": "implement",
                "status": "WAITING_APPROVAL",
                "startTime": "2024-05-01T10:00:00Z",
                "cost": {"tokens": 1200, "cost_usd": 0.5}
            }),
            None,
        )
        .unwrap();

        assert_eq!(patch.id, JobId::new("j-1"));
        assert_eq!(patch.issue_number, Some(42));
        assert_eq!(patch.status, Some(JobStatus::WaitingApproval));
        assert_eq!(
            patch.start_time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            patch.cost,
            Some(JobCost {
                tokens: Some(1200),
                usd: Some(0.5)
            })
        );
        assert_eq!(patch.error, None);
    }

    #[test]
    fn missing_id_uses_fallback_or_rejects() {
        let record = json!({"status": "running"});
        assert!(JobPatch::from_value(&record, None).is_none());
        let patch = JobPatch::from_value(&record, Some("k-9")).unwrap();
        assert_eq!(patch.id.as_str(), "k-9");
    }

    #[test]
    fn explicit_null_error_clears_existing_error() {
        let mut job = Job::new(JobId::new("a"));
        job.error = Some("boom".to_string());

        let keep = JobPatch::from_value(&json!({"id": "a"}), None).unwrap();
        keep.apply_to(&mut job);
        assert_eq!(job.error.as_deref(), Some("boom"));

        let clear = JobPatch::from_value(&json!({"id": "a", "error": null}), None).unwrap();
        clear.apply_to(&mut job);
        assert_eq!(job.error, None);
    }

    #[test]
    fn timestamps_accept_naive_and_epoch_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01 10:00:00.000")), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_714_557_600)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_714_557_600_000_i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
