use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::IssueKey;

/// Opaque server-assigned job identifier, stable for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canonical job collection, keyed by id.
pub type JobMap = BTreeMap<JobId, Job>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    WaitingApproval,
    ApprovedResume,
    Completed,
    Failed,
    Rejected,
    Interrupted,
    Blocked,
    #[default]
    Unknown,
}

impl JobStatus {
    /// Parses a server status string. Case and `_`/`-`/space separators are
    /// ignored; unrecognised values map to [`JobStatus::Unknown`].
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "waitingapproval" => Self::WaitingApproval,
            "approvedresume" => Self::ApprovedResume,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "rejected" => Self::Rejected,
            "interrupted" => Self::Interrupted,
            "blocked" => Self::Blocked,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::ApprovedResume => "approved_resume",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Interrupted => "interrupted",
            Self::Blocked => "blocked",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Interrupted
        )
    }

    /// Whether moving from `self` to `next` follows the job lifecycle.
    ///
    /// Statuses only move forward: pending, then the active statuses
    /// (running, waiting for approval, approved and resuming, blocked), then a
    /// terminal status. `unknown` on either side is always accepted.
    pub fn allows_transition(self, next: JobStatus) -> bool {
        if self == next || self == Self::Unknown || next == Self::Unknown {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.phase() >= self.phase()
    }

    fn phase(self) -> u8 {
        match self {
            Self::Pending | Self::Unknown => 0,
            Self::Running | Self::WaitingApproval | Self::ApprovedResume | Self::Blocked => 1,
            Self::Completed | Self::Failed | Self::Rejected | Self::Interrupted => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token and dollar usage reported for a job.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JobCost {
    pub tokens: Option<u64>,
    pub usd: Option<f64>,
}

impl JobCost {
    pub(crate) fn accumulate(&mut self, other: &JobCost) {
        if let Some(tokens) = other.tokens {
            self.tokens = Some(self.tokens.unwrap_or(0).saturating_add(tokens));
        }
        if let Some(usd) = other.usd {
            self.usd = Some(self.usd.unwrap_or(0.0) + usd);
        }
    }
}

/// One execution of an automated task against one repository issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub issue_number: u64,
    #[serde(default)]
    pub issue_title: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost: Option<JobCost>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    /// A job known only by id; every other field holds its sentinel value.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            repo: String::new(),
            issue_number: 0,
            issue_title: String::new(),
            command: String::new(),
            status: JobStatus::Unknown,
            start_time: None,
            completed_time: None,
            cost: None,
            error: None,
        }
    }

    /// Takes over fields this record left at their sentinel from `previous`,
    /// a record of the same job. Status and error stay as reported.
    pub fn inherit_missing(&mut self, previous: &Job) {
        if self.repo.is_empty() {
            self.repo.clone_from(&previous.repo);
        }
        if self.issue_number == 0 {
            self.issue_number = previous.issue_number;
        }
        if self.issue_title.is_empty() {
            self.issue_title.clone_from(&previous.issue_title);
        }
        if self.command.is_empty() {
            self.command.clone_from(&previous.command);
        }
        if self.start_time.is_none() {
            self.start_time = previous.start_time;
        }
        if self.cost.is_none() {
            self.cost = previous.cost;
        }
        // A finish time only carries over while the job stays in that state.
        if self.completed_time.is_none() && self.status == previous.status {
            self.completed_time = previous.completed_time;
        }
    }

    pub fn issue_key(&self) -> IssueKey {
        IssueKey {
            repo: self.repo.clone(),
            number: self.issue_number,
        }
    }
}

/// Lowercases and strips everything but ASCII alphanumerics, so that
/// `waiting_approval`, `WaitingApproval` and `waiting-approval` compare equal.
pub(crate) fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
