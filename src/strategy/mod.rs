//! The five cloning strategies.
//!
//! A strategy turns the enumerated subvolume set into an ordered transfer
//! plan: for every subvolume, which already-transferred subvolume to use as
//! the send parent and which to pass as clone sources. The orchestrator
//! executes the plan; strategies never touch the filesystem.

pub mod bruteforce;
pub mod chronological;
pub mod generation;
pub mod parent;
pub mod snapshot;

use std::collections::HashSet;

use serde::Serialize;

use crate::core::errors::{CloneError, Result};
use crate::core::options::StrategyKind;
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

/// One planned transfer. `parent` and `clone_sources` are uuids of other
/// enumerated subvolumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferStep {
    pub uuid: String,
    pub path: String,
    pub parent: Option<String>,
    pub clone_sources: Vec<String>,
    /// Why this parent was chosen; surfaces in verbose output.
    pub reason: &'static str,
}

/// The full ordered plan for one run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferPlan {
    pub strategy: &'static str,
    pub stages_via_flat_dir: bool,
    pub steps: Vec<TransferStep>,
}

impl TransferPlan {
    /// Wrap the steps, verifying that every enumerated subvolume is
    /// transferred exactly once.
    pub fn new(
        strategy: &'static str,
        stages_via_flat_dir: bool,
        steps: Vec<TransferStep>,
        graph: &SubvolGraph,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            if !seen.insert(step.uuid.as_str()) {
                return Err(CloneError::Internal {
                    details: format!("{strategy}: {} planned twice", step.path),
                });
            }
        }
        if seen.len() != graph.len() {
            return Err(CloneError::Internal {
                details: format!(
                    "{strategy}: planned {} of {} subvolumes",
                    seen.len(),
                    graph.len()
                ),
            });
        }
        Ok(Self {
            strategy,
            stages_via_flat_dir,
            steps,
        })
    }
}

/// A planner for one strategy.
pub trait Strategy {
    fn name(&self) -> &'static str;
    /// Whether transfers go through the flat staging area or straight into
    /// the destination tree.
    fn stages_via_flat_dir(&self) -> bool;
    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan>;
}

/// Instantiate the planner for a CLI strategy choice.
#[must_use]
pub fn strategy_for(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Parent => Box::new(parent::ParentStrategy),
        StrategyKind::Snapshot => Box::new(snapshot::SnapshotStrategy),
        StrategyKind::Chronological => Box::new(chronological::ChronologicalStrategy),
        StrategyKind::Generation => Box::new(generation::GenerationStrategy),
        StrategyKind::Bruteforce => Box::new(bruteforce::BruteforceStrategy),
    }
}

/// Emit the parent reference and the de-duplicated clone-source list.
pub(crate) fn build_flags(
    clone_sources: &[&Subvolume],
    best: Option<&Subvolume>,
) -> (Option<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for sv in clone_sources {
        if seen.insert(sv.uuid.as_str()) {
            sources.push(sv.uuid.clone());
        }
    }
    (best.map(|b| b.uuid.clone()), sources)
}

pub(crate) fn make_step(
    sv: &Subvolume,
    best: Option<&Subvolume>,
    clone_sources: &[&Subvolume],
    reason: &'static str,
) -> TransferStep {
    let (parent, clone_sources) = build_flags(clone_sources, best);
    TransferStep {
        uuid: sv.uuid.clone(),
        path: sv.path.clone(),
        parent,
        clone_sources,
        reason,
    }
}

/// Subvolumes with no present origin: either never a snapshot, or the origin
/// was deleted.
pub(crate) fn lineage_roots<'g>(graph: &'g SubvolGraph) -> Vec<&'g Subvolume> {
    let mut roots: Vec<&Subvolume> = graph
        .subvols()
        .iter()
        .filter(|sv| {
            sv.parent_uuid
                .as_deref()
                .map_or(true, |pu| graph.get(pu).is_none())
        })
        .collect();
    roots.sort_by_key(|sv| (sv.ogen, sv.id));
    roots
}
