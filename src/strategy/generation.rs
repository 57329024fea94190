//! GENERATION: transfer in `(gen, id)` order, picking the best ancestor
//! among everything already sent.
//!
//! The `done` list is kept most-recently-sent-first. For each subvolume the
//! rule chain below fires the first match, from the exact case (a static
//! child is a byte-identical later snapshot) down to "closest in creation
//! time". Static (read-only) relatives are preferred throughout: a
//! non-static reference has diverged arbitrarily and misguides the delta.

use crate::core::errors::Result;
use crate::strategy::{make_step, Strategy, TransferPlan};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;

pub struct GenerationStrategy;

impl Strategy for GenerationStrategy {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn stages_via_flat_dir(&self) -> bool {
        true
    }

    fn plan(&self, graph: &SubvolGraph) -> Result<TransferPlan> {
        let mut order: Vec<&Subvolume> = graph.subvols().iter().collect();
        order.sort_by_key(|sv| (sv.gen, sv.id));

        let mut done: Vec<&Subvolume> = Vec::new();
        let mut steps = Vec::with_capacity(order.len());
        for sv in order {
            let sel = select_best_ancestor(graph, sv, &done);
            steps.push(make_step(sv, sel.best, &sel.clone_sources, sel.reason));
            // Processing ascends (gen, id), so the newest transfer leads.
            done.insert(0, sv);
        }
        TransferPlan::new(self.name(), self.stages_via_flat_dir(), steps, graph)
    }
}

/// Outcome of the rule chain for one subvolume.
pub(crate) struct Selection<'g> {
    pub best: Option<&'g Subvolume>,
    pub clone_sources: Vec<&'g Subvolume>,
    pub reason: &'static str,
}

fn push_unique<'g>(sources: &mut Vec<&'g Subvolume>, sv: &'g Subvolume) {
    if !sources.iter().any(|x| x.uuid == sv.uuid) {
        sources.push(sv);
    }
}

/// The rule chain. `done` holds already-transferred subvolumes, most recent
/// first.
pub(crate) fn select_best_ancestor<'g>(
    graph: &'g SubvolGraph,
    sv: &Subvolume,
    done: &[&'g Subvolume],
) -> Selection<'g> {
    let mut sources: Vec<&'g Subvolume> = Vec::new();

    // Already-transferred snapshots OF this subvolume (a rollback leaves
    // them with lower generations). A static one is an exact image of sv at
    // a later point, the best possible reference.
    let children: Vec<&Subvolume> = done
        .iter()
        .copied()
        .filter(|d| d.parent_uuid.as_deref() == Some(sv.uuid.as_str()))
        .collect();
    if let Some(static_child) = children.iter().copied().find(|c| c.is_static()) {
        push_unique(&mut sources, static_child);
        for &c in &children {
            if c.ogen > static_child.ogen {
                push_unique(&mut sources, c);
            }
        }
        return Selection {
            best: Some(static_child),
            clone_sources: sources,
            reason: "static child",
        };
    }
    for &c in &children {
        push_unique(&mut sources, c);
    }

    let ancestors: Vec<&Subvolume> = graph
        .parents(sv)
        .filter(|a| done.iter().any(|d| d.uuid == a.uuid))
        .collect();
    let mom = ancestors.first().copied();
    let ancestor = ancestors.last().copied();
    if let (Some(m), Some(a)) = (mom, ancestor) {
        for &anc in &ancestors {
            push_unique(&mut sources, anc);
        }
        // The canonical fast path: the direct origin itself is on the
        // target already.
        if m.uuid == a.uuid {
            return Selection {
                best: Some(m),
                clone_sources: sources,
                reason: "mom",
            };
        }
    }

    let siblings: Vec<&Subvolume> = match sv.parent_uuid.as_deref() {
        Some(pu) => done
            .iter()
            .copied()
            .filter(|d| d.parent_uuid.as_deref() == Some(pu))
            .collect(),
        None => Vec::new(),
    };
    if siblings.is_empty() {
        return match ancestor {
            Some(a) => Selection {
                best: Some(a),
                clone_sources: sources,
                reason: "ancestor",
            },
            None => Selection {
                best: None,
                clone_sources: sources,
                reason: "orphan",
            },
        };
    }

    let brothers: Vec<&Subvolume> = siblings
        .iter()
        .copied()
        .filter(|x| x.ogen < sv.ogen)
        .collect();
    let sisters: Vec<&Subvolume> = siblings
        .iter()
        .copied()
        .filter(|x| x.ogen >= sv.ogen)
        .collect();

    let youngest_static_brother = brothers
        .iter()
        .copied()
        .filter(|x| x.is_static())
        .max_by_key(|x| (x.ogen, x.id));
    let youngest_brother = brothers
        .iter()
        .copied()
        .filter(|x| x.gen < sv.ogen)
        .max_by_key(|x| (x.ogen, x.id));
    let youngest_brother_ogen = brothers.iter().copied().max_by_key(|x| (x.ogen, x.id));
    let oldest_static_sister = sisters
        .iter()
        .copied()
        .filter(|x| x.is_static())
        .min_by_key(|x| (x.ogen, x.id));
    let oldest_sister = sisters.iter().copied().min_by_key(|x| (x.ogen, x.id));
    let oldest_sister_gen = sisters.iter().copied().min_by_key(|x| (x.gen, x.id));

    for candidate in [
        youngest_static_brother,
        youngest_brother,
        youngest_brother_ogen,
        oldest_static_sister,
        oldest_sister,
        oldest_sister_gen,
    ]
    .into_iter()
    .flatten()
    {
        push_unique(&mut sources, candidate);
    }

    if let Some(b) = youngest_static_brother {
        return Selection {
            best: Some(b),
            clone_sources: sources,
            reason: "static brother",
        };
    }
    if let Some(x) = oldest_static_sister {
        return Selection {
            best: Some(x),
            clone_sources: sources,
            reason: "static sister",
        };
    }
    if let Some(b) = youngest_brother {
        return Selection {
            best: Some(b),
            clone_sources: sources,
            reason: "youngest brother",
        };
    }
    if let Some(a) = ancestor {
        if a.is_static() {
            return Selection {
                best: Some(a),
                clone_sources: sources,
                reason: "static ancestor",
            };
        }
    }

    let nicest = [ancestor, youngest_brother_ogen, oldest_sister, oldest_sister_gen]
        .into_iter()
        .flatten()
        .min_by_key(|x| x.ogen.abs_diff(sv.ogen));
    match nicest {
        Some(x) => Selection {
            best: Some(x),
            clone_sources: sources,
            reason: "nicest relative",
        },
        None => Selection {
            best: None,
            clone_sources: sources,
            reason: "no nice relatives",
        },
    }
}
