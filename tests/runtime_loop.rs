// tests/runtime_loop.rs
mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{ScriptedRunner, harness, harness_with, init_tracing, wait_until};

use std::error::Error;
use std::time::Duration;

use stagedag::engine::{RuntimeOptions, SchedulerEvent};
use stagedag::fs::mock::MockFileSystem;
use stagedag::state::StageState;

type TestResult = Result<(), Box<dyn Error>>;

fn options(tick: Duration, exit_when_idle: bool) -> RuntimeOptions {
    RuntimeOptions {
        tick_interval: tick,
        exit_when_idle,
        shutdown_grace: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn once_mode_runs_eligible_stages_to_completion_and_exits() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let cfg = ConfigFileBuilder::new()
            .with_stage("extract", StageConfigBuilder::new().every("1h").build())
            .with_stage("transform", StageConfigBuilder::new().downstream_of("extract").build())
            .with_stage("load", StageConfigBuilder::new().downstream_of("transform").build())
            .with_stage("audit", StageConfigBuilder::new().manual().build())
            .build();
        let h = harness(cfg);
        let runtime = h
            .orchestrator
            .with_options(options(Duration::from_millis(20), true))
            .into_runtime();
        let scheduler = runtime.scheduler().clone();

        runtime.run().await?;

        let store = scheduler.store();
        for id in ["extract", "transform", "load"] {
            assert_eq!(store.state_of(id), Some(StageState::Completed), "stage {id}");
        }
        assert_eq!(store.state_of("audit"), Some(StageState::Idle));
        assert_eq!(h.runner.stages_run(), ["extract", "transform", "load"]);
        assert_eq!(scheduler.history().len(), 3);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn manual_trigger_wakes_the_loop_without_waiting_for_the_interval() -> TestResult {
    crate::common::with_timeout(async {
        init_tracing();
        let cfg = ConfigFileBuilder::new()
            .with_stage("a", StageConfigBuilder::new().manual().build())
            .with_stage("b", StageConfigBuilder::new().downstream_of("a").build())
            .build();
        let h = harness(cfg);
        let control = h.orchestrator.control();
        let events = h.orchestrator.events();
        // An interval far beyond the test timeout: only wake-ups can drive it.
        let runtime = h
            .orchestrator
            .with_options(options(Duration::from_secs(3600), false))
            .into_runtime();
        let scheduler = runtime.scheduler().clone();
        let handle = tokio::spawn(runtime.run());

        // Let the immediate first tick pass.
        tokio::task::yield_now().await;
        assert!(control.trigger("a")?.accepted);

        let store = scheduler.store().clone();
        wait_until(|| store.state_of("b") == Some(StageState::Completed)).await;
        assert_eq!(store.state_of("a"), Some(StageState::Completed));

        events.send(SchedulerEvent::ShutdownRequested).await?;
        handle.await??;
        assert_eq!(h.runner.stages_run(), ["a", "b"]);
        Ok(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_stages() -> TestResult {
    init_tracing();
    let runner = ScriptedRunner::new();
    runner.delay("backup", Duration::from_secs(2));
    let cfg = ConfigFileBuilder::new()
        .with_stage("backup", StageConfigBuilder::new().manual().build())
        .build();
    let h = harness_with(cfg, runner, MockFileSystem::new());
    let control = h.orchestrator.control();
    let events = h.orchestrator.events();
    let runtime = h
        .orchestrator
        .with_options(options(Duration::from_millis(100), false))
        .into_runtime();
    let scheduler = runtime.scheduler().clone();
    let handle = tokio::spawn(runtime.run());

    control.trigger("backup")?;
    let store = scheduler.store().clone();
    wait_until(|| store.state_of("backup") == Some(StageState::Running)).await;

    events.send(SchedulerEvent::ShutdownRequested).await?;
    handle.await??;

    assert_eq!(store.state_of("backup"), Some(StageState::Completed));
    assert_eq!(scheduler.history().len(), 1);
    Ok(())
}
