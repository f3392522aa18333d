// src/watch/watcher.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::DependencyGraph;
use crate::engine::SchedulerEvent;

/// Keeps the underlying `RecommendedWatcher` alive. Dropping it stops
/// watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    targets: Vec<PathBuf>,
}

impl WatcherHandle {
    /// Absolute artifact paths being watched.
    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("targets", &self.targets)
            .finish()
    }
}

/// Every artifact path named by a stage trigger, resolved against `root`
/// and made absolute where possible. Sorted and deduplicated.
pub fn artifact_targets(graph: &DependencyGraph, root: &Path) -> Vec<PathBuf> {
    let set: BTreeSet<PathBuf> = graph
        .stages()
        .flat_map(|s| s.artifact_paths())
        .map(|p| absolutize(&root.join(p)))
        .collect();
    set.into_iter().collect()
}

/// The watched artifact that a change at `changed` affects, if any.
///
/// A change affects an artifact when it is the artifact itself or lies
/// beneath it (artifact directories).
pub fn affected_artifact<'a>(targets: &'a [PathBuf], changed: &Path) -> Option<&'a PathBuf> {
    targets.iter().find(|t| changed.starts_with(t))
}

fn absolutize(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    // Not created yet: canonicalize the parent and keep the file name.
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Spawn a filesystem watcher over every artifact path in `graph` that sends
/// [`SchedulerEvent::ArtifactChanged`] on changes.
///
/// Existing artifacts are watched directly (recursively for directories);
/// missing ones through their parent directory so their creation is seen.
/// Paths with no existing parent are left to interval polling.
///
/// Returns `Ok(None)` when no stage has an artifact trigger.
pub fn spawn_watcher(
    graph: &DependencyGraph,
    root: &Path,
    scheduler_tx: mpsc::Sender<SchedulerEvent>,
) -> Result<Option<WatcherHandle>> {
    let targets = artifact_targets(graph, root);
    if targets.is_empty() {
        return Ok(None);
    }

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("stagedag: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("stagedag: artifact watch error: {err}");
            }
        },
        Config::default(),
    )?;

    let mut watched_dirs = BTreeSet::new();
    for target in &targets {
        if target.exists() {
            watcher.watch(target, RecursiveMode::Recursive)?;
            info!(path = ?target, "watching artifact");
        } else if let Some(parent) = target.parent().filter(|p| p.is_dir()) {
            if watched_dirs.insert(parent.to_path_buf()) {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
            }
            info!(path = ?target, dir = ?parent, "artifact missing; watching its directory");
        } else {
            warn!(path = ?target, "artifact has no existing parent directory; relying on polling");
        }
    }

    let async_targets = targets.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if event.kind.is_access() {
                continue;
            }
            for path in &event.paths {
                let Some(target) = affected_artifact(&async_targets, path) else {
                    continue;
                };
                debug!(changed = ?path, artifact = ?target, "artifact change detected");
                if scheduler_tx
                    .try_send(SchedulerEvent::ArtifactChanged {
                        path: target.clone(),
                    })
                    .is_err()
                {
                    debug!("scheduler channel full or closed; change left to the next tick");
                }
            }
        }
        debug!("artifact watcher loop finished");
    });

    Ok(Some(WatcherHandle {
        _inner: watcher,
        targets,
    }))
}
