// tests/scheduler_scenarios.rs
mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{Behaviour, ScriptedRunner, harness, harness_with, init_tracing};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use stagedag::config::{ConfigFile, Settings};
use stagedag::dag::{DependencyGraph, StageDef};
use stagedag::engine::Dispatch;
use stagedag::fs::mock::MockFileSystem;
use stagedag::state::{RunOutcome, StageState};
use stagedag::trigger::{TriggerCondition, TriggerReason};
use tokio::sync::Barrier;

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage("a", StageConfigBuilder::new().manual().build())
        .with_stage("b", StageConfigBuilder::new().downstream_of("a").build())
        .with_stage("c", StageConfigBuilder::new().downstream_of("b").build())
        .build()
}

fn dispatched(d: &[Dispatch]) -> Vec<(&str, TriggerReason)> {
    d.iter().map(|d| (d.stage.as_str(), d.reason)).collect()
}

#[tokio::test]
async fn manual_trigger_cascades_down_a_linear_chain() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let h = harness(chain());
        let scheduler = h.orchestrator.scheduler().clone();
        let control = h.orchestrator.control();

        // Nothing fires on its own.
        assert!(scheduler.tick().is_empty());

        assert!(control.trigger("a")?.accepted);
        assert_eq!(dispatched(&scheduler.tick()), [("a", TriggerReason::Manual)]);
        scheduler.drain().await;

        assert_eq!(dispatched(&scheduler.tick()), [("b", TriggerReason::Upstream)]);
        scheduler.drain().await;
        assert_eq!(dispatched(&scheduler.tick()), [("c", TriggerReason::Upstream)]);
        scheduler.drain().await;
        assert!(scheduler.tick().is_empty());

        let store = scheduler.store();
        for id in ["a", "b", "c"] {
            assert_eq!(store.state_of(id), Some(StageState::Completed), "stage {id}");
        }
        assert_eq!(h.runner.stages_run(), ["a", "b", "c"]);

        let history = control.history(None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].stage_id, "c");
        assert!(history.iter().all(|r| r.outcome == RunOutcome::Completed));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn dependent_of_failed_stage_waits_until_it_recovers() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let runner = ScriptedRunner::new();
        runner.then("a", Behaviour::Fail("upstream source offline".into()));
        let cfg = ConfigFileBuilder::new()
            .with_stage("a", StageConfigBuilder::new().manual().cooldown("60s").build())
            .with_stage("b", StageConfigBuilder::new().downstream_of("a").build())
            .build();
        let h = harness_with(cfg, runner, MockFileSystem::new());
        let scheduler = h.orchestrator.scheduler().clone();
        let store = scheduler.store().clone();

        h.orchestrator.control().trigger("a")?;
        scheduler.tick();
        scheduler.drain().await;

        let a = store.get("a").unwrap();
        assert_eq!(a.state, StageState::Failed);
        assert_eq!(a.last_error.as_deref(), Some("upstream source offline"));

        // Inside the cooldown nothing runs; b is blocked regardless.
        h.clock.advance(Duration::from_secs(30));
        assert!(scheduler.tick().is_empty());
        assert_eq!(store.state_of("b"), Some(StageState::Idle));

        h.clock.advance(Duration::from_secs(31));
        assert_eq!(dispatched(&scheduler.tick()), [("a", TriggerReason::Retry)]);
        scheduler.drain().await;
        assert_eq!(store.state_of("a"), Some(StageState::Completed));
        assert_eq!(store.state_of("b"), Some(StageState::Idle));

        assert_eq!(dispatched(&scheduler.tick()), [("b", TriggerReason::Upstream)]);
        scheduler.drain().await;
        assert_eq!(store.state_of("b"), Some(StageState::Completed));
        assert_eq!(h.runner.runs_of("b"), 1);
        Ok(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn timed_out_stage_fails_without_disturbing_others() -> TestResult {
    init_tracing();
    let runner = ScriptedRunner::new();
    runner.set("slow", Behaviour::Hang);
    let cfg = ConfigFileBuilder::new()
        .with_stage("slow", StageConfigBuilder::new().manual().timeout("100ms").build())
        .with_stage("fast", StageConfigBuilder::new().manual().build())
        .build();
    let h = harness_with(cfg, runner, MockFileSystem::new());
    let scheduler = h.orchestrator.scheduler().clone();
    let control = h.orchestrator.control();

    control.trigger("slow")?;
    control.trigger("fast")?;
    assert_eq!(scheduler.tick().len(), 2);
    scheduler.drain().await;

    let store = scheduler.store();
    let slow = store.get("slow").unwrap();
    assert_eq!(slow.state, StageState::Failed);
    assert!(
        slow.last_error.as_deref().unwrap_or_default().starts_with("timeout:"),
        "got {:?}",
        slow.last_error
    );
    assert_eq!(store.state_of("fast"), Some(StageState::Completed));

    let slow_record = control
        .history(None)
        .into_iter()
        .find(|r| r.stage_id == "slow")
        .expect("slow stage recorded");
    assert_eq!(slow_record.outcome, RunOutcome::Failed);
    assert!(slow_record.error.unwrap_or_default().starts_with("timeout:"));

    // The hung run was cancelled, not left behind.
    assert_eq!(scheduler.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn panicking_stage_is_contained_as_failure() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let runner = ScriptedRunner::new();
        runner.set("bad", Behaviour::Panic);
        let cfg = ConfigFileBuilder::new()
            .with_stage("bad", StageConfigBuilder::new().manual().build())
            .with_stage("good", StageConfigBuilder::new().manual().build())
            .build();
        let h = harness_with(cfg, runner, MockFileSystem::new());
        let scheduler = h.orchestrator.scheduler().clone();
        let control = h.orchestrator.control();

        control.trigger("bad")?;
        control.trigger("good")?;
        scheduler.tick();
        scheduler.drain().await;

        let bad = scheduler.store().get("bad").unwrap();
        assert_eq!(bad.state, StageState::Failed);
        assert!(bad.last_error.unwrap_or_default().contains("panicked"));
        assert_eq!(scheduler.store().state_of("good"), Some(StageState::Completed));
        Ok(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn running_stage_is_never_dispatched_twice() -> TestResult {
    init_tracing();
    let runner = ScriptedRunner::new();
    runner.delay("long", Duration::from_millis(500));
    let cfg = ConfigFileBuilder::new()
        .with_stage("long", StageConfigBuilder::new().manual().build())
        .build();
    let h = harness_with(cfg, runner, MockFileSystem::new());
    let scheduler = h.orchestrator.scheduler().clone();
    let control = h.orchestrator.control();

    control.trigger("long")?;
    assert_eq!(scheduler.tick().len(), 1);
    tokio::task::yield_now().await;

    let ack = control.trigger("long")?;
    assert!(!ack.accepted);
    assert_eq!(ack.current_state, StageState::Running);
    assert!(scheduler.tick().is_empty());
    assert!(scheduler.tick().is_empty());

    scheduler.drain().await;
    assert_eq!(h.runner.runs_of("long"), 1);
    assert_eq!(h.runner.max_concurrent("long"), 1);
    Ok(())
}

#[tokio::test]
async fn artifact_stage_runs_once_per_new_input() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let fs = MockFileSystem::new();
        let cfg = ConfigFileBuilder::new()
            .with_stage("ingest", StageConfigBuilder::new().artifact("inbox/orders.csv").build())
            .build();
        let h = harness_with(cfg, ScriptedRunner::new(), fs.clone());
        let scheduler = h.orchestrator.scheduler().clone();

        assert!(scheduler.tick().is_empty());

        fs.add_file("inbox/orders.csv", "order,qty\n1,3\n");
        assert_eq!(dispatched(&scheduler.tick()), [("ingest", TriggerReason::Artifact)]);
        scheduler.drain().await;
        assert!(scheduler.tick().is_empty());

        fs.add_file("inbox/orders.csv", "order,qty\n1,3\n2,5\n");
        assert_eq!(scheduler.tick().len(), 1);
        scheduler.drain().await;
        assert_eq!(h.runner.runs_of("ingest"), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn time_trigger_fires_on_schedule() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let cfg = ConfigFileBuilder::new()
            .with_stage("report", StageConfigBuilder::new().every("1h").build())
            .build();
        let h = harness(cfg);
        let scheduler = h.orchestrator.scheduler().clone();

        assert_eq!(dispatched(&scheduler.tick()), [("report", TriggerReason::Time)]);
        scheduler.drain().await;

        h.clock.advance(Duration::from_secs(1800));
        assert!(scheduler.tick().is_empty());

        h.clock.advance(Duration::from_secs(1800));
        assert_eq!(scheduler.tick().len(), 1);
        scheduler.drain().await;
        assert_eq!(h.runner.runs_of("report"), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn exhausted_retry_budget_waits_for_manual_trigger() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let runner = ScriptedRunner::new();
        runner.set("flaky", Behaviour::Fail("exit code 1".into()));
        let cfg = ConfigFileBuilder::new()
            .with_stage(
                "flaky",
                StageConfigBuilder::new().manual().cooldown("1s").max_retries(1).build(),
            )
            .build();
        let h = harness_with(cfg, runner, MockFileSystem::new());
        let scheduler = h.orchestrator.scheduler().clone();
        let control = h.orchestrator.control();

        control.trigger("flaky")?;
        scheduler.tick();
        scheduler.drain().await;

        h.clock.advance(Duration::from_secs(2));
        assert_eq!(dispatched(&scheduler.tick()), [("flaky", TriggerReason::Retry)]);
        scheduler.drain().await;
        assert_eq!(scheduler.store().get("flaky").unwrap().consecutive_failures, 2);

        h.clock.advance(Duration::from_secs(2));
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.store().state_of("flaky"), Some(StageState::Failed));

        assert!(control.trigger("flaky")?.accepted);
        assert_eq!(dispatched(&scheduler.tick()), [("flaky", TriggerReason::Manual)]);
        scheduler.drain().await;
        assert_eq!(h.runner.runs_of("flaky"), 3);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn unbounded_timeout_still_finishes_the_run() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        // Built directly so that config validation does not cap the timeout.
        let cfg = ConfigFile::new_unchecked(
            Settings::default(),
            DependencyGraph::load(vec![
                StageDef::new("forever")
                    .trigger(TriggerCondition::Manual)
                    .timeout(Duration::MAX),
            ])?,
        );
        let h = harness(cfg);
        let scheduler = h.orchestrator.scheduler().clone();
        let control = h.orchestrator.control();

        assert!(control.trigger("forever")?.accepted);
        assert_eq!(scheduler.tick().len(), 1);
        scheduler.drain().await;

        assert_eq!(scheduler.store().state_of("forever"), Some(StageState::Completed));
        assert_eq!(control.history(None).len(), 1);
        assert_eq!(scheduler.in_flight(), 0);

        // Not wedged in Running: a second trigger is accepted.
        assert!(control.trigger("forever")?.accepted);
        Ok(())
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_and_ticks_run_a_stage_once() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let runner = ScriptedRunner::new();
        runner.delay("ingest", Duration::from_millis(300));
        let cfg = ConfigFileBuilder::new()
            .with_stage("ingest", StageConfigBuilder::new().manual().build())
            .build();
        let h = harness_with(cfg, runner, MockFileSystem::new());
        let scheduler = h.orchestrator.scheduler().clone();

        let callers = 12;
        let barrier = Arc::new(Barrier::new(callers));
        let mut tasks = Vec::with_capacity(callers);
        for _ in 0..callers {
            let scheduler = Arc::clone(&scheduler);
            let control = h.orchestrator.control();
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                let accepted = control.trigger("ingest").map(|ack| ack.accepted);
                let dispatched = scheduler.tick().len();
                (accepted, dispatched)
            }));
        }

        let mut dispatched = 0;
        for task in tasks {
            let (accepted, count) = task.await?;
            accepted?;
            dispatched += count;
        }
        scheduler.drain().await;

        assert_eq!(dispatched, 1);
        assert_eq!(h.runner.runs_of("ingest"), 1);
        assert_eq!(h.runner.max_concurrent("ingest"), 1);
        assert_eq!(scheduler.store().state_of("ingest"), Some(StageState::Completed));
        Ok(())
    })
    .await
}
