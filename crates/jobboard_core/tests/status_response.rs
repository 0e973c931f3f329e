use jobboard_core::{parse_status_response, JobId, JobStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn empty_array_and_empty_object_yield_empty_maps() {
    assert!(parse_status_response(&json!([])).is_empty());
    assert!(parse_status_response(&json!({})).is_empty());
    assert!(parse_status_response(&json!(null)).is_empty());
}

#[test]
fn array_and_object_shapes_yield_identical_maps() {
    let array = json!([
        {"id": "a", "repo": "acme/app", "issue_number": 1, "status": "running"},
        {"id": "b", "repo": "acme/app", "issue_number": 2, "status": "COMPLETED"}
    ]);
    let object = json!({
        "a": {"repo": "acme/app", "issue_number": 1, "status": "running"},
        "b": {"id": "b", "repo": "acme/app", "issue_number": 2, "status": "completed"}
    });

    let from_array = parse_status_response(&array);
    let from_object = parse_status_response(&object);
    assert_eq!(from_array.len(), 2);
    assert_eq!(from_array, from_object);
    assert_eq!(from_array[&JobId::new("b")].status, JobStatus::Completed);
}

#[test]
fn wrapped_jobs_key_is_unwrapped() {
    let wrapped = json!({"jobs": [{"id": "a", "status": "pending"}]});
    let jobs = parse_status_response(&wrapped);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[&JobId::new("a")].status, JobStatus::Pending);
}

#[test]
fn corrupt_records_do_not_hide_the_rest() {
    let body = json!([
        {"id": "good", "status": "exploding"},
        {"status": "running"},
        "not a record",
        {"id": "also-good", "issue_number": "not a number"}
    ]);
    let jobs = parse_status_response(&body);

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[&JobId::new("good")].status, JobStatus::Unknown);
    assert_eq!(jobs[&JobId::new("also-good")].issue_number, 0);
}

#[test]
fn scalar_body_is_ignored() {
    assert!(parse_status_response(&json!("ok")).is_empty());
}
