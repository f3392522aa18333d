#![allow(dead_code)]

use std::sync::Arc;

use stagedag::clock::ManualClock;
use stagedag::config::ConfigFile;
use stagedag::engine::Orchestrator;
use stagedag::fs::mock::MockFileSystem;

pub use stagedag_test_utils::builders;
pub use stagedag_test_utils::fake_runner::{Behaviour, ScriptedRunner};
pub use stagedag_test_utils::{init_tracing, wait_until, with_timeout};

/// Everything a scheduler-level test needs, wired over fakes.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runner: ScriptedRunner,
    pub clock: ManualClock,
    pub fs: MockFileSystem,
}

pub fn harness(cfg: ConfigFile) -> Harness {
    harness_with(cfg, ScriptedRunner::new(), MockFileSystem::new())
}

pub fn harness_with(cfg: ConfigFile, runner: ScriptedRunner, fs: MockFileSystem) -> Harness {
    let clock = ManualClock::starting_now();
    let orchestrator = Orchestrator::builder(cfg)
        .runner(runner.shared())
        .clock(Arc::new(clock.clone()))
        .filesystem(Arc::new(fs.clone()))
        .build()
        .expect("orchestrator builds from a valid config");

    Harness {
        orchestrator,
        runner,
        clock,
        fs,
    }
}
