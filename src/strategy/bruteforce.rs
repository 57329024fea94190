//! BRUTEFORCE: PARENT ordering with the clone-source set widened to every
//! older lineage relative.
//!
//! Maximizes extent reuse at the cost of larger send-side working sets. The
//! parent is the direct origin (when still present), not the oldest
//! ancestor.

use crate::core::errors::Result;
use crate::strategy::{make_step, Strategy, TransferPlan};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

pub struct BruteforceStrategy;

impl Strategy for BruteforceStrategy {
    fn name(&self) -> &'static str {
        "bruteforce"
    }

    fn stages_via_flat_dir(&self) -> bool {
        false
    }

    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan> {
        let mut order: Vec<&Subvolume> = graph.subvols().iter().collect();
        order.sort_by_key(|sv| (sv.ogen, sv.id));

        let mut steps = Vec::with_capacity(order.len());
        for sv in order {
            let best = sv.parent_uuid.as_deref().and_then(|pu| graph.get(pu));
            let sources: Vec<&Subvolume> = graph
                .relatives(sv)
                .into_iter()
                .filter(|rel| rel.ogen < sv.ogen)
                .collect();
            let reason = if sources.is_empty() { "root" } else { "relatives" };
            steps.push(make_step(sv, best, &sources, reason));
        }
        TransferPlan::new(self.name(), self.stages_via_flat_dir(), steps, graph)
    }
}
