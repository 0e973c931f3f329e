use chrono::{TimeZone, Utc};
use jobboard_core::{group_issues, BoardColumn, Job, JobCost, JobId, JobStatus};
use pretty_assertions::assert_eq;

fn job(id: &str, repo: &str, number: u64, status: JobStatus, hour: u32) -> Job {
    let mut job = Job::new(JobId::new(id));
    job.repo = repo.to_string();
    job.issue_number = number;
    job.status = status;
    job.start_time = Some(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap());
    job
}

#[test]
fn column_priority_follows_most_urgent_status() {
    use JobStatus::*;
    assert_eq!(
        BoardColumn::from_statuses([Completed, Failed, Running]),
        BoardColumn::Running
    );
    assert_eq!(
        BoardColumn::from_statuses([WaitingApproval, Blocked]),
        BoardColumn::NeedsAttention
    );
    assert_eq!(
        BoardColumn::from_statuses([Completed, WaitingApproval]),
        BoardColumn::AwaitingApproval
    );
    assert_eq!(
        BoardColumn::from_statuses([Completed, Completed]),
        BoardColumn::Done
    );
    assert_eq!(
        BoardColumn::from_statuses([Completed, Pending]),
        BoardColumn::Queued
    );
    assert_eq!(
        BoardColumn::from_statuses([ApprovedResume]),
        BoardColumn::Running
    );
    assert_eq!(BoardColumn::from_statuses(Vec::<JobStatus>::new()), BoardColumn::Queued);
}

#[test]
fn jobs_group_by_repo_and_issue_number() {
    let mut plan = job("j1", "acme/app", 7, JobStatus::Completed, 9);
    plan.issue_title = "Add dark mode".to_string();
    plan.cost = Some(JobCost {
        tokens: Some(100),
        usd: Some(0.5),
    });
    let mut implement = job("j2", "acme/app", 7, JobStatus::Running, 11);
    implement.cost = Some(JobCost {
        tokens: Some(300),
        usd: None,
    });
    let other_repo = job("j3", "acme/api", 7, JobStatus::Completed, 10);

    let sorted = [&implement, &other_repo, &plan];
    let issues = group_issues(sorted);

    assert_eq!(issues.len(), 2);
    let first = &issues[0];
    assert_eq!(first.key.repo, "acme/app");
    assert_eq!(first.title, "Add dark mode");
    assert_eq!(first.column, BoardColumn::Running);
    assert_eq!(first.job_ids, vec![JobId::new("j2"), JobId::new("j1")]);
    assert_eq!(
        first.total_cost,
        Some(JobCost {
            tokens: Some(400),
            usd: Some(0.5)
        })
    );

    let second = &issues[1];
    assert_eq!(second.key.repo, "acme/api");
    assert_eq!(second.column, BoardColumn::Done);
    assert_eq!(second.total_cost, None);
}

#[test]
fn oversized_costs_do_not_break_grouping() {
    let mut first = job("a", "acme/app", 3, JobStatus::Completed, 9);
    first.cost = Some(JobCost {
        tokens: Some(u64::MAX),
        usd: Some(1.0),
    });
    let mut second = job("b", "acme/app", 3, JobStatus::Running, 10);
    second.cost = Some(JobCost {
        tokens: Some(u64::MAX),
        usd: Some(2.0),
    });

    let issues = group_issues([&first, &second]);
    assert_eq!(issues.len(), 1);
    let total = issues[0].total_cost.expect("summed cost");
    assert_eq!(total.tokens, Some(u64::MAX));
    assert_eq!(total.usd, Some(3.0));
}
