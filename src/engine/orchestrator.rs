// src/engine/orchestrator.rs

//! Wiring: builds the store, history, scheduler and control API from a
//! validated config.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::api::ControlApi;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigFile, Settings};
use crate::dag::DependencyGraph;
use crate::errors::Result;
use crate::exec::{CommandRunner, StageExecutor, StageRunner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::state::{HistoryLog, StageStateStore, StatePersister};
use crate::trigger::{ArtifactProbe, TriggerEvaluator};

use super::runtime::Runtime;
use super::scheduler::Scheduler;
use super::{RuntimeOptions, SchedulerEvent};

/// Capacity of the scheduler wake-up channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builder for an [`Orchestrator`].
///
/// Only the config is required. Defaults: system clock, real filesystem,
/// current directory as root, and a [`CommandRunner`] over each stage's
/// `cmd`.
pub struct OrchestratorBuilder {
    graph: DependencyGraph,
    settings: Settings,
    runner: Option<Arc<dyn StageRunner>>,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    restore: bool,
}

impl OrchestratorBuilder {
    pub fn runner(mut self, runner: Arc<dyn StageRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Directory that relative artifact, state-file and command paths
    /// resolve against.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Whether to load the persisted state file at build time (default on).
    pub fn restore_state(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let runner = match self.runner {
            Some(runner) => runner,
            None => Arc::new(CommandRunner::from_graph(&self.graph)?.with_workdir(&self.root)),
        };

        let graph = Arc::new(self.graph);
        let store = Arc::new(StageStateStore::new(&graph, Arc::clone(&self.clock)));
        let history = Arc::new(HistoryLog::new(self.settings.history_capacity));

        let persister = self.settings.state_file.as_ref().map(|path| {
            let path = if path.is_relative() {
                self.root.join(path)
            } else {
                path.clone()
            };
            Arc::new(StatePersister::new(path, Arc::clone(&self.fs)))
        });

        if self.restore {
            if let Some(persister) = &persister {
                if persister.restore_into(&store, &history)? {
                    info!(path = ?persister.path(), "resumed from persisted state");
                }
            }
        }

        let evaluator = TriggerEvaluator::new(ArtifactProbe::new(Arc::clone(&self.fs), &self.root));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&graph),
            Arc::clone(&store),
            Arc::clone(&history),
            evaluator,
            StageExecutor::new(runner),
            Arc::clone(&self.clock),
            event_tx.clone(),
            persister.clone(),
        ));

        let control = ControlApi::new(
            graph,
            store,
            history,
            event_tx.clone(),
            self.clock,
            persister,
        );

        let options = RuntimeOptions {
            tick_interval: self.settings.tick_interval,
            ..RuntimeOptions::default()
        };

        Ok(Orchestrator {
            scheduler,
            control,
            event_tx,
            event_rx,
            options,
        })
    }
}

/// An assembled but not yet running orchestrator.
#[derive(Debug)]
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    control: ControlApi,
    event_tx: mpsc::Sender<SchedulerEvent>,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    options: RuntimeOptions,
}

impl Orchestrator {
    pub fn builder(config: ConfigFile) -> OrchestratorBuilder {
        OrchestratorBuilder {
            graph: config.graph,
            settings: config.settings,
            runner: None,
            clock: Arc::new(SystemClock),
            fs: Arc::new(RealFileSystem),
            root: PathBuf::from("."),
            restore: true,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn control(&self) -> ControlApi {
        self.control.clone()
    }

    /// Sender for waking the monitor loop (watcher, signal handler).
    pub fn events(&self) -> mpsc::Sender<SchedulerEvent> {
        self.event_tx.clone()
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Consume into the monitor loop.
    pub fn into_runtime(self) -> Runtime {
        Runtime::new(self.scheduler, self.event_rx, self.options)
    }
}
