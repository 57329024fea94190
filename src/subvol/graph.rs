//! UUID-indexed subvolume set with the lineage queries the strategies need.
//!
//! Queries are linear scans over the enumerated list; the sets involved are
//! small (typically well under a thousand subvolumes) so no secondary index
//! is kept beyond the uuid map.

use std::collections::{HashMap, HashSet};

use crate::core::errors::{CloneError, Result};
use crate::subvol::model::Subvolume;

/// The enumerated subvolume set, in enumeration order, indexed by uuid.
#[derive(Debug)]
pub struct SubvolGraph {
    subvols: Vec<Subvolume>,
    by_uuid: HashMap<String, usize>,
}

impl SubvolGraph {
    /// Build the graph, verifying the uniqueness invariants.
    pub fn new(subvols: Vec<Subvolume>) -> Result<Self> {
        let mut by_uuid = HashMap::with_capacity(subvols.len());
        let mut ids = HashSet::with_capacity(subvols.len());
        for (idx, sv) in subvols.iter().enumerate() {
            if by_uuid.insert(sv.uuid.clone(), idx).is_some() {
                return Err(CloneError::Enumeration {
                    details: format!("duplicate uuid {} ({sv})", sv.uuid),
                });
            }
            if !ids.insert(sv.id) {
                return Err(CloneError::Enumeration {
                    details: format!("duplicate id {} ({sv})", sv.id),
                });
            }
        }
        Ok(Self { subvols, by_uuid })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subvols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subvols.is_empty()
    }

    /// All subvolumes in enumeration order.
    #[must_use]
    pub fn subvols(&self) -> &[Subvolume] {
        &self.subvols
    }

    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<&Subvolume> {
        self.by_uuid.get(uuid).map(|&idx| &self.subvols[idx])
    }

    /// Walk the snapshot lineage upward while the origin is present.
    ///
    /// The first element is the direct origin; the walk stops at the first
    /// absent `parent_uuid` (a deleted origin is treated as a root). The
    /// returned items borrow the graph, not `s`.
    pub fn parents<'a>(&'a self, s: &Subvolume) -> impl Iterator<Item = &'a Subvolume> + 'a {
        std::iter::successors(self.direct_parent(s), move |cur| self.direct_parent(cur))
    }

    fn direct_parent<'a>(&'a self, s: &Subvolume) -> Option<&'a Subvolume> {
        s.parent_uuid.as_deref().and_then(|uuid| self.get(uuid))
    }

    /// Direct snapshots of the given uuid.
    ///
    /// Works for uuids absent from the graph, so orphan roots (deleted
    /// origins) can still enumerate their children.
    pub fn children<'a>(&'a self, uuid: &'a str) -> impl Iterator<Item = &'a Subvolume> + 'a {
        self.subvols
            .iter()
            .filter(move |sv| sv.parent_uuid.as_deref() == Some(uuid))
    }

    /// Transitive closure of `children`.
    #[must_use]
    pub fn descendants<'a>(&'a self, uuid: &'a str) -> Vec<&'a Subvolume> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = vec![uuid];
        while let Some(cur) = stack.pop() {
            for child in self.children(cur) {
                out.push(child);
                stack.push(&child.uuid);
            }
        }
        out
    }

    /// Subvolumes sharing `s.parent_uuid`, excluding `s` itself.
    ///
    /// Empty for non-snapshots: two origin-less subvolumes are unrelated.
    pub fn siblings<'a>(&'a self, s: &'a Subvolume) -> impl Iterator<Item = &'a Subvolume> + 'a {
        self.subvols.iter().filter(move |sv| {
            sv.uuid != s.uuid
                && sv.parent_uuid.is_some()
                && sv.parent_uuid == s.parent_uuid
        })
    }

    /// Every subvolume connected to `s` through the snapshot lineage,
    /// excluding `s` itself.
    ///
    /// Takes the oldest present ancestor A of `s` (or `s` when it has none);
    /// the lineage root key is A's own `parent_uuid` when A still records a
    /// deleted origin, otherwise A's uuid. Yields A (when distinct from `s`)
    /// plus all descendants of the root key.
    #[must_use]
    pub fn relatives<'a>(&'a self, s: &'a Subvolume) -> Vec<&'a Subvolume> {
        let top = self.parents(s).last().unwrap_or(s);
        let root_key = top.parent_uuid.as_deref().unwrap_or(&top.uuid);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut out: Vec<&Subvolume> = Vec::new();
        if top.uuid != s.uuid && seen.insert(&top.uuid) {
            out.push(top);
        }
        for d in self.descendants(root_key) {
            if d.uuid != s.uuid && seen.insert(&d.uuid) {
                out.push(d);
            }
        }
        out
    }
}
