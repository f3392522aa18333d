// tests/persistence.rs
mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{ScriptedRunner, init_tracing};

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use stagedag::clock::{Clock, ManualClock};
use stagedag::config::ConfigFile;
use stagedag::engine::Orchestrator;
use stagedag::errors::StagedagError;
use stagedag::fs::RealFileSystem;
use stagedag::state::{
    ExecutionRecord, HistoryLog, PersistedState, RunOutcome, StageSnapshot, StageState,
    StageStateStore, StatePersister,
};
use stagedag::trigger::TriggerReason;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn pipeline(state_file: &Path) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new().manual().build())
        .with_stage("b", StageConfigBuilder::new().downstream_of("a").build())
        .state_file(state_file)
        .build()
}

fn build(cfg: ConfigFile, runner: &ScriptedRunner, clock: &ManualClock) -> Orchestrator {
    Orchestrator::builder(cfg)
        .runner(runner.shared())
        .clock(Arc::new(clock.clone()))
        .filesystem(Arc::new(RealFileSystem))
        .build()
        .expect("orchestrator builds")
}

#[test]
fn save_then_load_round_trips_store_and_history() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("nested/state.json");
    let cfg = pipeline(&path);
    let clock = ManualClock::starting_now();
    let store = StageStateStore::new(&cfg.graph, Arc::new(clock.clone()));
    let history = HistoryLog::new(10);

    assert!(store.try_mark_pending("a", StageState::Idle, TriggerReason::Manual));
    assert_eq!(store.try_begin_run("a"), Some(TriggerReason::Manual));
    assert!(store.try_transition("a", StageState::Running, StageState::Completed));
    let now = clock.now();
    history.append(ExecutionRecord {
        stage_id: "a".into(),
        started_at: now,
        finished_at: now,
        outcome: RunOutcome::Completed,
        trigger_reason: TriggerReason::Manual,
        error: None,
    });

    let persister = StatePersister::new(&path, Arc::new(RealFileSystem));
    assert!(persister.load()?.is_none(), "nothing saved yet");
    persister.save(&store, &history, now)?;
    assert!(path.exists(), "parent directories are created");

    let loaded = persister.load()?.expect("state saved");
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.stages["a"].state, StageState::Completed);
    assert_eq!(loaded.stages["b"].state, StageState::Idle);
    assert_eq!(loaded.history.len(), 1);

    let fresh_store = StageStateStore::new(&cfg.graph, Arc::new(clock.clone()));
    let fresh_history = HistoryLog::new(10);
    assert!(persister.restore_into(&fresh_store, &fresh_history)?);
    assert_eq!(fresh_store.snapshot(), store.snapshot());
    assert_eq!(fresh_history.all(), history.all());
    Ok(())
}

#[test]
fn unsupported_version_is_rejected() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    fs::write(
        &path,
        r#"{"version": 99, "savedAt": "2026-01-01T00:00:00Z", "stages": {}, "history": []}"#,
    )?;

    let persister = StatePersister::new(&path, Arc::new(RealFileSystem));
    match persister.load() {
        Err(StagedagError::ConfigError(msg)) => assert!(msg.contains("99"), "{msg}"),
        other => panic!("expected version error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn corrupt_state_file_is_an_error() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    fs::write(&path, "{ not json")?;

    let persister = StatePersister::new(&path, Arc::new(RealFileSystem));
    assert!(matches!(persister.load(), Err(StagedagError::JsonError(_))));
    Ok(())
}

#[test]
fn restart_resumes_completed_and_fails_interrupted_stages() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("state.json");
    let started = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let mut stages = BTreeMap::new();
    stages.insert(
        "a".to_string(),
        StageSnapshot {
            state: StageState::Completed,
            last_run_started_at: Some(started),
            last_run_finished_at: Some(started + ChronoDuration::seconds(5)),
            last_completed_at: Some(started + ChronoDuration::seconds(5)),
            ..StageSnapshot::default()
        },
    );
    stages.insert(
        "b".to_string(),
        StageSnapshot {
            state: StageState::Running,
            last_run_started_at: Some(started + ChronoDuration::seconds(6)),
            ..StageSnapshot::default()
        },
    );
    stages.insert("ghost".to_string(), StageSnapshot::default());
    let persisted = PersistedState {
        version: 1,
        saved_at: started + ChronoDuration::seconds(7),
        stages,
        history: Vec::new(),
    };
    fs::write(&path, serde_json::to_vec(&persisted)?)?;

    let clock = ManualClock::new(started + ChronoDuration::minutes(10));
    let orchestrator = build(pipeline(&path), &ScriptedRunner::new(), &clock);
    let store = orchestrator.scheduler().store();

    assert_eq!(store.state_of("a"), Some(StageState::Completed));
    let b = store.get("b").expect("b");
    assert_eq!(b.state, StageState::Failed);
    assert_eq!(b.last_error.as_deref(), Some("interrupted: process restarted"));
    assert_eq!(b.consecutive_failures, 1);
    assert_eq!(store.get("ghost"), None, "stages no longer configured are dropped");

    // Skipping restore starts from scratch.
    let clean = Orchestrator::builder(pipeline(&path))
        .runner(ScriptedRunner::new().shared())
        .filesystem(Arc::new(RealFileSystem))
        .restore_state(false)
        .build()?;
    assert_eq!(clean.scheduler().store().state_of("a"), Some(StageState::Idle));
    Ok(())
}

#[tokio::test]
async fn finished_executions_are_written_through() -> TestResult {
    crate::common::with_timeout(async {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        let runner = ScriptedRunner::new();
        let clock = ManualClock::starting_now();
        let orchestrator = build(pipeline(&path), &runner, &clock);
        let scheduler = orchestrator.scheduler().clone();

        orchestrator.control().trigger("a")?;
        scheduler.tick();
        scheduler.drain().await;

        let saved: PersistedState = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(saved.stages["a"].state, StageState::Completed);
        assert_eq!(saved.history.len(), 1);
        assert_eq!(saved.history[0].stage_id, "a");

        // A second process picks up where the first left off: b still owes
        // a run for a's completion.
        let resumed = build(pipeline(&path), &runner, &clock);
        let dispatched = resumed.scheduler().tick();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].stage, "b");
        assert_eq!(dispatched[0].reason, TriggerReason::Upstream);
        resumed.scheduler().drain().await;
        assert_eq!(runner.stages_run(), ["a", "b"]);
        Ok(())
    })
    .await
}
