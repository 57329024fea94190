//! SNAPSHOT: roots first, then newest-first depth-first.
//!
//! Within a fan-out of snapshots of one origin, adjacent-in-generation
//! snapshots share the most extents, so each child is sent against the
//! previously sent sibling (or the root itself for the first child), which
//! serves as both parent and sole clone source. Uses the flat staging area.

use crate::core::errors::Result;
use crate::strategy::{lineage_roots, make_step, Strategy, TransferPlan, TransferStep};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

pub struct SnapshotStrategy;

impl Strategy for SnapshotStrategy {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn stages_via_flat_dir(&self) -> bool {
        true
    }

    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan> {
        let mut steps = Vec::with_capacity(graph.len());
        for root in lineage_roots(graph) {
            steps.push(make_step(root, None, &[], "root"));
            walk(graph, root, &mut steps);
        }
        TransferPlan::new(self.name(), self.stages_via_flat_dir(), steps, graph)
    }
}

fn walk<'g>(graph: &'g SubvolGraph, from: &'g Subvolume, steps: &mut Vec<TransferStep>) {
    let mut kids: Vec<&Subvolume> = graph.children(&from.uuid).collect();
    kids.sort_by_key(|c| std::cmp::Reverse((c.ogen, c.id)));

    let mut prev = from;
    for child in kids {
        steps.push(make_step(child, Some(prev), &[prev], "previous neighbor"));
        walk(graph, child, steps);
        prev = child;
    }
}
