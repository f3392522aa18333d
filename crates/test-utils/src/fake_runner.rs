use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagedag::dag::StageId;
use stagedag::exec::{RunFuture, StageContext, StageOutcome, StageRunner};
use stagedag::trigger::TriggerReason;

/// What a scripted stage does when run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    Complete,
    Fail(String),
    /// Never finishes; only the executor deadline ends it.
    Hang,
    Panic,
}

#[derive(Debug, Default)]
struct State {
    queued: HashMap<StageId, VecDeque<Behaviour>>,
    sticky: HashMap<StageId, Behaviour>,
    delays: HashMap<StageId, Duration>,
    calls: Vec<(StageId, TriggerReason)>,
    running: HashMap<StageId, usize>,
    max_running: HashMap<StageId, usize>,
}

/// A fake runner that:
/// - records which stages were run, and why
/// - completes, fails, hangs or panics per stage as scripted
/// - tracks how many runs of each stage overlapped
///
/// Unscripted stages complete immediately.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<State>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn StageRunner> {
        Arc::new(self.clone())
    }

    /// Behaviour for every run of `stage` unless a queued one is pending.
    pub fn set(&self, stage: &str, behaviour: Behaviour) -> &Self {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert(stage.to_string(), behaviour);
        self
    }

    /// Behaviour for the next run of `stage` only.
    pub fn then(&self, stage: &str, behaviour: Behaviour) -> &Self {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(stage.to_string())
            .or_default()
            .push_back(behaviour);
        self
    }

    /// Sleep this long before acting.
    pub fn delay(&self, stage: &str, delay: Duration) -> &Self {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(stage.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(StageId, TriggerReason)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn stages_run(&self) -> Vec<StageId> {
        self.calls().into_iter().map(|(s, _)| s).collect()
    }

    pub fn runs_of(&self, stage: &str) -> usize {
        self.calls().iter().filter(|(s, _)| s == stage).count()
    }

    /// Highest number of simultaneous runs seen for `stage`.
    pub fn max_concurrent(&self, stage: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_running
            .get(stage)
            .copied()
            .unwrap_or(0)
    }

    fn begin(&self, ctx: &StageContext) -> (Behaviour, Option<Duration>) {
        let mut st = self.state.lock().unwrap();
        st.calls.push((ctx.stage_id.clone(), ctx.reason));

        let running = st.running.entry(ctx.stage_id.clone()).or_default();
        *running += 1;
        let now = *running;
        let max = st.max_running.entry(ctx.stage_id.clone()).or_default();
        *max = (*max).max(now);

        let behaviour = st
            .queued
            .get_mut(&ctx.stage_id)
            .and_then(|q| q.pop_front())
            .or_else(|| st.sticky.get(&ctx.stage_id).cloned())
            .unwrap_or(Behaviour::Complete);
        (behaviour, st.delays.get(&ctx.stage_id).copied())
    }
}

/// Decrements the running count even when the run future is dropped.
struct RunningGuard {
    state: Arc<Mutex<State>>,
    stage: StageId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            if let Some(n) = st.running.get_mut(&self.stage) {
                *n = n.saturating_sub(1);
            }
        }
    }
}

impl StageRunner for ScriptedRunner {
    fn run(&self, ctx: StageContext) -> RunFuture<'_> {
        Box::pin(async move {
            let (behaviour, delay) = self.begin(&ctx);
            let _guard = RunningGuard {
                state: Arc::clone(&self.state),
                stage: ctx.stage_id.clone(),
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match behaviour {
                Behaviour::Complete => StageOutcome::Completed,
                Behaviour::Fail(msg) => StageOutcome::Failed(msg),
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Panic => panic!("scripted panic in stage {}", ctx.stage_id),
            }
        })
    }
}
