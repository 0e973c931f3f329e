use board_logging::board_warn;
use serde_json::Value;

use crate::job::JobMap;
use crate::record::JobPatch;

/// Parses the body of `GET /api/status` into a job map.
///
/// The server answers either with an array of records or with an object
/// keyed by job id (optionally wrapped as `{"jobs": ...}`). Records that
/// cannot be decoded are skipped so one corrupt entry never hides the rest.
pub fn parse_status_response(value: &Value) -> JobMap {
    let mut jobs = JobMap::new();
    match value {
        Value::Array(records) => {
            for record in records {
                insert_record(&mut jobs, record, None);
            }
        }
        Value::Object(map) => {
            if let Some(inner) = map.get("jobs").filter(|v| v.is_array() || v.is_object()) {
                return parse_status_response(inner);
            }
            for (key, record) in map {
                insert_record(&mut jobs, record, Some(key.as_str()));
            }
        }
        Value::Null => {}
        other => {
            board_warn!("Ignoring status response of unexpected shape: {}", other);
        }
    }
    jobs
}

fn insert_record(jobs: &mut JobMap, record: &Value, key: Option<&str>) {
    match JobPatch::from_value(record, key) {
        Some(patch) => {
            let job = patch.into_job();
            jobs.insert(job.id.clone(), job);
        }
        None => {
            board_warn!("Skipping undecodable job record (key={:?})", key);
        }
    }
}
