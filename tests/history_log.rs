// tests/history_log.rs
mod common;

use chrono::{Duration, TimeZone, Utc};
use stagedag::state::{ExecutionRecord, HistoryLog, RunOutcome};
use stagedag::trigger::TriggerReason;

fn record(i: i64) -> ExecutionRecord {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(i);
    ExecutionRecord {
        stage_id: format!("stage_{i}"),
        started_at: start,
        finished_at: start + Duration::milliseconds(250),
        outcome: if i % 2 == 0 {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed
        },
        trigger_reason: TriggerReason::Time,
        error: (i % 2 == 1).then(|| format!("run {i} failed")),
    }
}

#[test]
fn recent_is_most_recent_first_and_bounded_by_limit() {
    common::init_tracing();
    let log = HistoryLog::new(10);
    for i in 0..5 {
        log.append(record(i));
    }

    let recent = log.recent(3);
    let ids: Vec<_> = recent.iter().map(|r| r.stage_id.as_str()).collect();
    assert_eq!(ids, ["stage_4", "stage_3", "stage_2"]);

    assert_eq!(log.recent(100).len(), 5);
    assert!(log.recent(0).is_empty());
}

#[test]
fn appending_past_capacity_evicts_oldest() {
    let log = HistoryLog::new(3);
    for i in 0..7 {
        log.append(record(i));
    }

    assert_eq!(log.len(), 3);
    let ids: Vec<_> = log.all().into_iter().map(|r| r.stage_id).collect();
    assert_eq!(ids, ["stage_4", "stage_5", "stage_6"]);
    assert!(log.recent(10).iter().all(|r| r.stage_id != "stage_0"));
}

#[test]
fn zero_capacity_is_clamped_to_one() {
    let log = HistoryLog::new(0);
    assert_eq!(log.capacity(), 1);
    log.append(record(1));
    log.append(record(2));
    assert_eq!(log.recent(5), vec![record(2)]);
}

#[test]
fn restore_keeps_only_newest_records() {
    let log = HistoryLog::new(2);
    log.append(record(99));
    log.restore((0..4).map(record).collect());

    let ids: Vec<_> = log.all().into_iter().map(|r| r.stage_id).collect();
    assert_eq!(ids, ["stage_2", "stage_3"]);
}

#[test]
fn records_serialize_with_camel_case_fields() {
    let value = serde_json::to_value(record(1)).unwrap();
    assert_eq!(value["stageId"], "stage_1");
    assert_eq!(value["outcome"], "Failed");
    assert_eq!(value["triggerReason"], "time");
    assert_eq!(value["error"], "run 1 failed");
    assert!(value.get("startedAt").is_some());
    assert!(value.get("finishedAt").is_some());
}
