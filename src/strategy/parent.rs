//! PARENT: preserve the UUID-parent lineage on the target.
//!
//! Transfers in `(ogen, id)` order; each subvolume is sent with its direct
//! origin as parent and its whole ancestor chain as clone sources. Receives
//! directly at the final tree position, so no staging area is involved.

use crate::core::errors::Result;
use crate::strategy::{make_step, Strategy, TransferPlan};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

pub struct ParentStrategy;

impl Strategy for ParentStrategy {
    fn name(&self) -> &'static str {
        "parent"
    }

    fn stages_via_flat_dir(&self) -> bool {
        false
    }

    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan> {
        let mut order: Vec<&Subvolume> = graph.subvols().iter().collect();
        order.sort_by_key(|sv| (sv.ogen, sv.id));

        let mut steps = Vec::with_capacity(order.len());
        for sv in order {
            let ancestors: Vec<&Subvolume> = graph.parents(sv).collect();
            let reason = if ancestors.is_empty() { "root" } else { "origin" };
            steps.push(make_step(sv, ancestors.first().copied(), &ancestors, reason));
        }
        TransferPlan::new(self.name(), self.stages_via_flat_dir(), steps, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(id: u64, path: &str, uuid: &str, parent_uuid: Option<&str>, ogen: u64) -> Subvolume {
        Subvolume {
            path: path.to_string(),
            id,
            parent_id: 5,
            uuid: uuid.to_string(),
            parent_uuid: parent_uuid.map(str::to_string),
            gen: ogen + 1,
            ogen,
            ro: false,
        }
    }

    /// The readme fan-out: `current` with four read-only snapshots.
    fn fan_out() -> SubvolGraph {
        SubvolGraph::new(vec![
            sv(256, "current", "cur", None, 10),
            sv(257, "snap1", "s1", Some("cur"), 20),
            sv(258, "snap2", "s2", Some("cur"), 30),
            sv(259, "snap3", "s3", Some("cur"), 40),
            sv(260, "snap4", "s4", Some("cur"), 50),
        ])
        .unwrap()
    }

    #[test]
    fn fan_out_sends_current_then_snaps_with_current_as_parent() {
        let plan = ParentStrategy.plan(&fan_out()).unwrap();
        let order: Vec<&str> = plan.steps.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(order, vec!["current", "snap1", "snap2", "snap3", "snap4"]);

        assert_eq!(plan.steps[0].parent, None);
        for step in &plan.steps[1..] {
            assert_eq!(step.parent.as_deref(), Some("cur"));
            assert_eq!(step.clone_sources, vec!["cur".to_string()]);
        }
    }

    #[test]
    fn chains_pass_the_whole_ancestor_line_as_clone_sources() {
        let g = SubvolGraph::new(vec![
            sv(256, "a", "a", None, 10),
            sv(257, "b", "b", Some("a"), 20),
            sv(258, "c", "c", Some("b"), 30),
        ])
        .unwrap();
        let plan = ParentStrategy.plan(&g).unwrap();
        let c = &plan.steps[2];
        assert_eq!(c.parent.as_deref(), Some("b"));
        assert_eq!(c.clone_sources, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn parent_strategy_places_directly() {
        assert!(!ParentStrategy.stages_via_flat_dir());
    }

    #[test]
    fn every_parent_is_transferred_before_its_user() {
        let plan = ParentStrategy.plan(&fan_out()).unwrap();
        let mut sent = std::collections::HashSet::new();
        for step in &plan.steps {
            if let Some(p) = &step.parent {
                assert!(sent.contains(p.as_str()), "{} before its parent", step.path);
            }
            sent.insert(step.uuid.as_str());
        }
    }
}
