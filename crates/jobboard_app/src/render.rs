//! Plain-text rendering of board views for the terminal.

use std::fmt::Write as _;

use jobboard_core::{BoardColumn, BoardView, ErrorClass, Issue, Job, JobCost, JobStreamFrame};
use serde_json::Value;

/// Columns in the order they are printed; the ones needing action come first.
const COLUMN_ORDER: [BoardColumn; 5] = [
    BoardColumn::NeedsAttention,
    BoardColumn::AwaitingApproval,
    BoardColumn::Running,
    BoardColumn::Queued,
    BoardColumn::Done,
];

pub fn board(view: &BoardView) -> String {
    let mut out = header(view);
    for column in COLUMN_ORDER {
        let issues: Vec<&Issue> = view.issues_in(column).collect();
        if issues.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{} ({})", column.label().to_uppercase(), issues.len());
        for issue in issues {
            let _ = writeln!(out, "  {}", issue_line(issue));
        }
    }
    out
}

pub fn job_list(view: &BoardView) -> String {
    let mut out = header(view);
    if view.jobs.is_empty() {
        out.push_str("no jobs\n");
    }
    for job in &view.jobs {
        let _ = writeln!(out, "{}", job_line(job));
    }
    out
}

/// `[kind] text` for one live frame of a job stream.
pub fn stream_frame(frame: &JobStreamFrame) -> String {
    let text = ["line", "message", "content", "text"]
        .iter()
        .find_map(|key| frame.payload.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| frame.payload.to_string());
    format!("[{}] {}", frame.kind, text)
}

fn header(view: &BoardView) -> String {
    let mut out = format!("connection: {} | jobs: {}\n", view.connection, view.job_count());
    if let Some(notice) = &view.last_error {
        let hint = match notice.class {
            ErrorClass::Configuration => " (run `jobboard set-server <url>`)",
            ErrorClass::Transient => " (retrying)",
            ErrorClass::Request => "",
        };
        let _ = writeln!(out, "! {}{}", notice.error, hint);
    }
    out
}

fn issue_line(issue: &Issue) -> String {
    let mut line = issue_ref(&issue.key.repo, issue.key.number);
    if !issue.title.is_empty() {
        let _ = write!(line, " {}", issue.title);
    }
    let jobs = issue.job_ids.len();
    let _ = write!(line, "  [{} job{}", jobs, if jobs == 1 { "" } else { "s" });
    if let Some(cost) = issue.total_cost.as_ref().and_then(cost_label) {
        let _ = write!(line, ", {cost}");
    }
    line.push(']');
    line
}

fn job_line(job: &Job) -> String {
    let started = job
        .start_time
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:<14} {:<17} {:<10} {:<24} {}",
        job.id.as_str(),
        job.status.as_str(),
        if job.command.is_empty() { "-" } else { job.command.as_str() },
        issue_ref(&job.repo, job.issue_number),
        started
    );
    if let Some(error) = &job.error {
        let _ = write!(line, "  error: {error}");
    }
    line
}

fn issue_ref(repo: &str, number: u64) -> String {
    if repo.is_empty() {
        format!("-#{number}")
    } else {
        format!("{repo}#{number}")
    }
}

fn cost_label(cost: &JobCost) -> Option<String> {
    match (cost.usd, cost.tokens) {
        (Some(usd), _) => Some(format!("${usd:.2}")),
        (None, Some(tokens)) => Some(format!("{tokens} tokens")),
        (None, None) => None,
    }
}
