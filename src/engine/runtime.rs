// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::errors::Result;

use super::scheduler::Scheduler;
use super::{RuntimeOptions, SchedulerEvent};

/// The monitor loop.
///
/// Ticks the [`Scheduler`] every `tick_interval`, and additionally right
/// after any [`SchedulerEvent`] other than shutdown so that dependents of a
/// finished stage and manual triggers do not wait for the next interval.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    options: RuntimeOptions,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        scheduler: Arc<Scheduler>,
        event_rx: mpsc::Receiver<SchedulerEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            event_rx,
            options,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Main loop. Returns after shutdown is requested, the event channel
    /// closes, or (with `exit_when_idle`) the graph goes quiet.
    pub async fn run(mut self) -> Result<()> {
        info!(
            order = ?self.scheduler.graph().topological_order(),
            tick_interval = ?self.options.tick_interval,
            "stagedag runtime started"
        );

        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                event = self.event_rx.recv() => match event {
                    None => {
                        info!("scheduler event channel closed; exiting");
                        break;
                    }
                    Some(SchedulerEvent::ShutdownRequested) => {
                        info!("shutdown requested; stopping runtime");
                        break;
                    }
                    Some(event) => debug!(?event, "runtime woken by event"),
                },
            }
            let dispatched = self.scheduler.tick_in_background().await;

            if !dispatched.is_empty() {
                debug!(?dispatched, "tick dispatched stages");
            }

            if self.options.exit_when_idle
                && dispatched.is_empty()
                && !self.scheduler.store().any_running()
            {
                // A stage may have finished after this tick's snapshot was
                // taken; confirm against a fresh one. Executions still doing
                // their bookkeeping are drained by shutdown.
                let confirm = self.scheduler.tick_in_background().await;
                if confirm.is_empty() {
                    info!("no stage running and nothing left to trigger; exiting");
                    break;
                }
                debug!(dispatched = ?confirm, "tick dispatched stages");
            }
        }

        self.scheduler.shutdown(self.options.shutdown_grace).await;
        info!("runtime exiting");
        Ok(())
    }
}
