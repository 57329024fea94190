//! CHRONOLOGICAL: oldest-first post-order over the snapshot lineage.
//!
//! Children are walked ascending by `(ogen, id)` and each child is handed
//! its previously sent sibling as parent; the node itself goes out last,
//! against the last child it walked. The root of a lineage therefore appears
//! on the target as a read-write snapshot of its own child, inverting the
//! original parent-of relation.

use crate::core::errors::Result;
use crate::strategy::{lineage_roots, make_step, Strategy, TransferPlan, TransferStep};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

pub struct ChronologicalStrategy;

impl Strategy for ChronologicalStrategy {
    fn name(&self) -> &'static str {
        "chronological"
    }

    fn stages_via_flat_dir(&self) -> bool {
        true
    }

    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan> {
        let mut steps = Vec::with_capacity(graph.len());
        for root in lineage_roots(graph) {
            visit(graph, root, None, &mut steps);
        }
        TransferPlan::new(self.name(), self.stages_via_flat_dir(), steps, graph)
    }
}

fn visit<'g>(
    graph: &'g SubvolGraph,
    node: &'g Subvolume,
    passed_parent: Option<&'g Subvolume>,
    steps: &mut Vec<TransferStep>,
) {
    let mut kids: Vec<&Subvolume> = graph.children(&node.uuid).collect();
    kids.sort_by_key(|c| (c.ogen, c.id));

    let mut prev: Option<&Subvolume> = None;
    for child in kids {
        visit(graph, child, prev, steps);
        prev = Some(child);
    }

    let step = match (passed_parent, prev) {
        (Some(parent), Some(last)) => {
            make_step(node, Some(parent), &[parent, last], "previous sibling")
        }
        (Some(parent), None) => make_step(node, Some(parent), &[parent], "previous sibling"),
        (None, Some(last)) => make_step(node, Some(last), &[last], "last child"),
        (None, None) => make_step(node, None, &[], "root"),
    };
    steps.push(step);
}
