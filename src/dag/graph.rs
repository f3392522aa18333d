// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::stage::{StageDef, StageId};
use crate::errors::{Result, StagedagError};
use crate::state::{StageSnapshot, StageState, StageStateStore};
use crate::trigger::TriggerCondition;

/// Validated, immutable DAG of pipeline stages.
///
/// Construction via [`DependencyGraph::load`] is the only place acyclicity and
/// reference validity are checked; everything downstream assumes them.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    stages: BTreeMap<StageId, StageDef>,
    dependents: HashMap<StageId, Vec<StageId>>,
    order: Vec<StageId>,
}

impl DependencyGraph {
    /// Validate and build the graph.
    ///
    /// Fails with a configuration error if:
    /// - two stages share an id,
    /// - a stage depends on itself or on an unknown stage,
    /// - an upstream trigger names an unknown stage,
    /// - the dependency edges contain a cycle.
    pub fn load(stages: impl IntoIterator<Item = StageDef>) -> Result<Self> {
        let mut by_id: BTreeMap<StageId, StageDef> = BTreeMap::new();
        for stage in stages {
            if stage.id.trim().is_empty() {
                return Err(StagedagError::ConfigError(
                    "stage ids must not be empty".to_string(),
                ));
            }
            if by_id.contains_key(&stage.id) {
                return Err(StagedagError::ConfigError(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
            by_id.insert(stage.id.clone(), stage);
        }

        if by_id.is_empty() {
            return Err(StagedagError::ConfigError(
                "pipeline must contain at least one stage".to_string(),
            ));
        }

        validate_references(&by_id)?;
        let order = topological_sort(&by_id)?;

        let mut dependents: HashMap<StageId, Vec<StageId>> =
            by_id.keys().map(|id| (id.clone(), Vec::new())).collect();
        for stage in by_id.values() {
            for dep in &stage.depends_on {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(stage.id.clone());
                }
            }
        }

        debug!(?order, "stage graph loaded");

        Ok(Self {
            stages: by_id,
            dependents,
            order,
        })
    }

    /// Stage ids in an order where every stage comes after all of its
    /// dependencies. Stable for a given set of stages.
    pub fn topological_order(&self) -> &[StageId] {
        &self.order
    }

    /// Stage definitions in topological order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDef> {
        self.order.iter().filter_map(|id| self.stages.get(id))
    }

    pub fn stage(&self, id: &str) -> Option<&StageDef> {
        self.stages.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Direct dependencies of a stage (its `depends_on`).
    pub fn dependencies_of(&self, id: &str) -> &[StageId] {
        self.stages
            .get(id)
            .map(|s| s.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependents of a stage (stages listing it in `depends_on`).
    pub fn dependents_of(&self, id: &str) -> &[StageId] {
        self.dependents
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Stages without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.stages()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id.as_str())
    }

    /// True iff every dependency of `id` is currently `Completed`.
    pub fn is_ready(&self, id: &str, store: &StageStateStore) -> bool {
        self.dependencies_of(id)
            .iter()
            .all(|dep| store.state_of(dep) == Some(StageState::Completed))
    }

    /// Same as [`is_ready`](Self::is_ready), evaluated against a snapshot
    /// taken earlier in the tick.
    pub fn is_ready_in(&self, id: &str, snapshot: &BTreeMap<StageId, StageSnapshot>) -> bool {
        self.dependencies_of(id).iter().all(|dep| {
            snapshot
                .get(dep)
                .is_some_and(|s| s.state == StageState::Completed)
        })
    }
}

fn validate_references(stages: &BTreeMap<StageId, StageDef>) -> Result<()> {
    for (id, stage) in stages {
        for dep in &stage.depends_on {
            if dep == id {
                return Err(StagedagError::ConfigError(format!(
                    "stage '{id}' cannot depend on itself"
                )));
            }
            if !stages.contains_key(dep) {
                return Err(StagedagError::ConfigError(format!(
                    "stage '{id}' has unknown dependency '{dep}'"
                )));
            }
        }
        for trigger in &stage.triggers {
            if let TriggerCondition::UpstreamJustCompleted(up) = trigger {
                if up == id {
                    return Err(StagedagError::ConfigError(format!(
                        "stage '{id}' cannot use itself as an upstream trigger"
                    )));
                }
                if !stages.contains_key(up) {
                    return Err(StagedagError::ConfigError(format!(
                        "stage '{id}' has upstream trigger on unknown stage '{up}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn topological_sort(stages: &BTreeMap<StageId, StageDef>) -> Result<Vec<StageId>> {
    // Edge direction: dep -> stage. Nodes go in sorted by id so that the
    // resulting order does not depend on hash iteration.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in stages.keys() {
        graph.add_node(id.as_str());
    }
    for (id, stage) in stages {
        for dep in &stage.depends_on {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(StagedagError::DagCycle(format!(
            "cycle detected in stage graph involving stage '{}'",
            cycle.node_id()
        ))),
    }
}
