use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobCost, JobId, JobStatus};

/// `(repo, issue number)` pair that groups jobs into one board card.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IssueKey {
    pub repo: String,
    pub number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardColumn {
    Queued,
    Running,
    NeedsAttention,
    AwaitingApproval,
    Done,
}

impl BoardColumn {
    /// Derives the column of an issue from its jobs' statuses. Priority:
    /// any running, then any failed or blocked, then any awaiting approval,
    /// then all completed. Everything else is queued.
    pub fn from_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut seen = 0usize;
        let mut running = false;
        let mut attention = false;
        let mut approval = false;
        let mut all_completed = true;
        for status in statuses {
            seen += 1;
            match status {
                JobStatus::Running | JobStatus::ApprovedResume => running = true,
                JobStatus::Failed | JobStatus::Blocked => attention = true,
                JobStatus::WaitingApproval => approval = true,
                _ => {}
            }
            all_completed &= status == JobStatus::Completed;
        }

        if running {
            Self::Running
        } else if attention {
            Self::NeedsAttention
        } else if approval {
            Self::AwaitingApproval
        } else if seen > 0 && all_completed {
            Self::Done
        } else {
            Self::Queued
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::NeedsAttention => "needs attention",
            Self::AwaitingApproval => "awaiting approval",
            Self::Done => "done",
        }
    }
}

/// View over every job that shares one [`IssueKey`]. Recomputed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub key: IssueKey,
    pub title: String,
    pub column: BoardColumn,
    /// Most recent first.
    pub job_ids: Vec<JobId>,
    pub latest_start: Option<DateTime<Utc>>,
    pub total_cost: Option<JobCost>,
}

/// Groups jobs into issues. `jobs` is expected most-recent-first; issues come
/// back ordered by their latest job start, newest first.
pub fn group_issues<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Vec<Issue> {
    let mut grouped: BTreeMap<IssueKey, Vec<&Job>> = BTreeMap::new();
    for job in jobs {
        grouped.entry(job.issue_key()).or_default().push(job);
    }

    let mut issues: Vec<Issue> = grouped
        .into_iter()
        .map(|(key, jobs)| build_issue(key, &jobs))
        .collect();
    issues.sort_by(|a, b| {
        b.latest_start
            .cmp(&a.latest_start)
            .then_with(|| a.key.cmp(&b.key))
    });
    issues
}

fn build_issue(key: IssueKey, jobs: &[&Job]) -> Issue {
    let title = jobs
        .iter()
        .map(|job| job.issue_title.as_str())
        .find(|title| !title.is_empty())
        .unwrap_or_default()
        .to_string();

    let mut total_cost: Option<JobCost> = None;
    for cost in jobs.iter().filter_map(|job| job.cost.as_ref()) {
        total_cost.get_or_insert_with(JobCost::default).accumulate(cost);
    }

    Issue {
        key,
        title,
        column: BoardColumn::from_statuses(jobs.iter().map(|job| job.status)),
        job_ids: jobs.iter().map(|job| job.id.clone()).collect(),
        latest_start: jobs.iter().filter_map(|job| job.start_time).max(),
        total_cost,
    }
}
