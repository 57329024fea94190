//! In-memory btrfs world for deterministic tests.
//!
//! `MockFs` implements both `FsOps` and `Transport` over a shared node tree,
//! so orchestrator scenarios can run end-to-end without a real filesystem.
//! Snapshot and receive semantics mirror the utility's observable behavior:
//! snapshots do not recurse into nested subvolumes (they appear as empty
//! directories), receive creates the new subvolume read-only, and rename
//! moves whole subtrees.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::errors::{CloneError, Result};
use crate::platform::ops::FsOps;
use crate::subvol::model::Subvolume;
use crate::transfer::transport::{SendRequest, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    Subvol,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    ro: bool,
}

/// One recorded `send_recv` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    pub source: PathBuf,
    pub dest_dir: PathBuf,
    pub parent: Option<PathBuf>,
    pub clone_sources: Vec<PathBuf>,
}

/// Journal of externally visible mutations, for ordering assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    SetRo { path: PathBuf, ro: bool },
    Transfer { source: PathBuf },
}

#[derive(Default)]
struct World {
    nodes: BTreeMap<PathBuf, Node>,
    /// Mount roots and their device ids; longest prefix wins.
    mounts: Vec<(PathBuf, u64)>,
    fs_uuids: HashMap<PathBuf, String>,
    /// Seeded enumeration result per source mount.
    listings: HashMap<PathBuf, Vec<Subvolume>>,
    records: Vec<SendRecord>,
    events: Vec<MockEvent>,
    fail_sources: HashSet<PathBuf>,
    /// Basenames that become foreign mounts when they appear on the target.
    nested_mount_basenames: HashMap<String, u64>,
    /// Mutating operations become no-ops, the way `BtrfsCli` and
    /// `PipedTransport` skip execution under dry-run.
    dry_run: bool,
}

impl World {
    fn node(&self, path: &Path) -> Result<&Node> {
        self.nodes.get(path).ok_or_else(|| {
            CloneError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "mock: no such node"),
            )
        })
    }

    fn children_of(&self, path: &Path) -> Vec<PathBuf> {
        self.nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect()
    }

    fn subtree_of(&self, path: &Path) -> Vec<PathBuf> {
        self.nodes
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect()
    }

    /// Copy `src` to `dest` the way snapshot/receive materialize trees:
    /// nested subvolumes become empty directories, their content is not
    /// carried across.
    fn copy_tree(&mut self, src: &Path, dest: &Path, top_ro: bool) {
        let mut copies: Vec<(PathBuf, Node)> = Vec::new();
        let keys = self.subtree_of(src);
        let mut nested: Vec<PathBuf> = Vec::new();
        for key in keys {
            let node = self.nodes[&key].clone();
            if key == src {
                copies.push((
                    dest.to_path_buf(),
                    Node {
                        kind: NodeKind::Subvol,
                        ro: top_ro,
                    },
                ));
                continue;
            }
            if nested.iter().any(|n| key.starts_with(n)) {
                continue;
            }
            let rel = key.strip_prefix(src).expect("subtree key under src");
            let kind = if node.kind == NodeKind::Subvol {
                nested.push(key.clone());
                NodeKind::Dir
            } else {
                node.kind
            };
            copies.push((dest.join(rel), Node { kind, ro: false }));
        }
        for (path, node) in copies {
            if let Some(dev) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.nested_mount_basenames.get(n).copied())
            {
                self.mounts.push((path.clone(), dev));
            }
            self.nodes.insert(path, node);
        }
    }

    fn device_of(&self, path: &Path) -> Result<u64> {
        self.node(path)?;
        self.mounts
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.as_os_str().len())
            .map(|&(_, dev)| dev)
            .ok_or_else(|| {
                CloneError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "mock: no mount"),
                )
            })
    }
}

/// Cloneable handle over the shared world.
#[derive(Clone, Default)]
pub struct MockFs {
    world: Arc<Mutex<World>>,
}

impl MockFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().expect("mock world lock poisoned")
    }

    // ── seeding ──

    pub fn add_mount(&self, root: impl Into<PathBuf>, uuid: &str, dev: u64) {
        let root = root.into();
        let mut w = self.lock();
        w.nodes.insert(
            root.clone(),
            Node {
                kind: NodeKind::Dir,
                ro: false,
            },
        );
        w.mounts.push((root.clone(), dev));
        w.fs_uuids.insert(root.clone(), uuid.to_string());
        w.listings.entry(root).or_default();
    }

    /// Register a subvolume under a source mount: creates its node (and
    /// missing intermediate directories) and adds it to the enumeration.
    pub fn seed_subvol(&self, mnt: &Path, sv: Subvolume) {
        let full = sv.path_under(mnt);
        let mut w = self.lock();
        let mut cur = full.clone();
        let mut missing = Vec::new();
        while let Some(parent) = cur.parent() {
            if w.nodes.contains_key(parent) {
                break;
            }
            missing.push(parent.to_path_buf());
            cur = parent.to_path_buf();
        }
        for dir in missing.into_iter().rev() {
            w.nodes.insert(
                dir,
                Node {
                    kind: NodeKind::Dir,
                    ro: false,
                },
            );
        }
        w.nodes.insert(
            full,
            Node {
                kind: NodeKind::Subvol,
                ro: sv.ro,
            },
        );
        w.listings.entry(mnt.to_path_buf()).or_default().push(sv);
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.lock().nodes.insert(
            path.into(),
            Node {
                kind: NodeKind::Dir,
                ro: false,
            },
        );
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.lock().nodes.insert(
            path.into(),
            Node {
                kind: NodeKind::File,
                ro: false,
            },
        );
    }

    /// Make every transfer whose send side is `source` fail.
    pub fn fail_transfers_from(&self, source: impl Into<PathBuf>) {
        self.lock().fail_sources.insert(source.into());
    }

    /// Drop all injected transfer failures (the fault went away).
    pub fn clear_transfer_failures(&self) {
        self.lock().fail_sources.clear();
    }

    /// When an entry with this basename materializes on the target, register
    /// it as a mount on a foreign device.
    pub fn add_nested_mount_basename(&self, basename: &str, dev: u64) {
        self.lock()
            .nested_mount_basenames
            .insert(basename.to_string(), dev);
    }

    /// Turn every mutating operation into a no-op, matching the dry-run
    /// behavior of the production implementations. Reads keep reflecting
    /// the unmutated world.
    pub fn set_dry_run(&self, dry_run: bool) {
        self.lock().dry_run = dry_run;
    }

    // ── inspection ──

    #[must_use]
    pub fn records(&self) -> Vec<SendRecord> {
        self.lock().records.clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    #[must_use]
    pub fn is_subvol(&self, path: &Path) -> bool {
        self.lock()
            .nodes
            .get(path)
            .is_some_and(|n| n.kind == NodeKind::Subvol)
    }

    #[must_use]
    pub fn is_dir(&self, path: &Path) -> bool {
        self.lock()
            .nodes
            .get(path)
            .is_some_and(|n| n.kind == NodeKind::Dir)
    }

    #[must_use]
    pub fn ro_of(&self, path: &Path) -> Option<bool> {
        self.lock().nodes.get(path).map(|n| n.ro)
    }
}

impl FsOps for MockFs {
    fn enumerate_subvolumes(&self, mnt: &Path) -> Result<Vec<Subvolume>> {
        let w = self.lock();
        let mut listing = w
            .listings
            .get(mnt)
            .cloned()
            .ok_or_else(|| CloneError::Enumeration {
                details: format!("mock: no listing for {}", mnt.display()),
            })?;
        listing.sort_by_key(|sv| (sv.ogen, sv.id));
        Ok(listing)
    }

    fn filesystem_uuid(&self, mnt: &Path) -> Result<String> {
        self.lock()
            .fs_uuids
            .get(mnt)
            .cloned()
            .ok_or_else(|| CloneError::FilesystemUuid {
                mount: mnt.to_path_buf(),
                details: "mock: unknown mount".to_string(),
            })
    }

    fn get_ro(&self, path: &Path) -> Result<bool> {
        Ok(self.lock().node(path)?.ro)
    }

    fn set_ro(&self, path: &Path, ro: bool) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        w.node(path)?;
        w.events.push(MockEvent::SetRo {
            path: path.to_path_buf(),
            ro,
        });
        w.nodes.get_mut(path).expect("checked above").ro = ro;
        Ok(())
    }

    fn snapshot(&self, src: &Path, dest: &Path, readonly: bool) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        w.node(src)?;
        if w.nodes.contains_key(dest) {
            return Err(CloneError::Command {
                program: "snapshot".to_string(),
                details: format!("mock: {} exists", dest.display()),
            });
        }
        w.copy_tree(src, dest, readonly);
        Ok(())
    }

    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        if w.node(path)?.kind != NodeKind::Subvol {
            return Err(CloneError::Command {
                program: "subvolume delete".to_string(),
                details: format!("mock: {} is not a subvolume", path.display()),
            });
        }
        for key in w.subtree_of(path) {
            w.nodes.remove(&key);
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        let mut cur = path.to_path_buf();
        let mut missing = vec![];
        loop {
            if w.nodes.contains_key(&cur) {
                break;
            }
            missing.push(cur.clone());
            match cur.parent() {
                Some(p) if !p.as_os_str().is_empty() => cur = p.to_path_buf(),
                _ => break,
            }
        }
        for dir in missing.into_iter().rev() {
            w.nodes.insert(
                dir,
                Node {
                    kind: NodeKind::Dir,
                    ro: false,
                },
            );
        }
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        if w.node(path)?.kind != NodeKind::Dir {
            return Err(CloneError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "mock: not a directory"),
            ));
        }
        if !w.children_of(path).is_empty() {
            return Err(CloneError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "mock: directory not empty"),
            ));
        }
        w.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut w = self.lock();
        if w.dry_run {
            return Ok(());
        }
        w.node(from)?;
        if let Some(existing) = w.nodes.get(to) {
            // rename(2) semantics: files and empty directories are
            // replaced, anything populated refuses.
            let replaceable = existing.kind == NodeKind::File
                || (existing.kind == NodeKind::Dir && w.children_of(to).is_empty());
            if !replaceable {
                return Err(CloneError::io(
                    to,
                    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "mock: target exists"),
                ));
            }
            w.nodes.remove(to);
        }
        for key in w.subtree_of(from) {
            let node = w.nodes.remove(&key).expect("subtree key present");
            let rel = key.strip_prefix(from).expect("subtree key under from");
            w.nodes.insert(to.join(rel), node);
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().nodes.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let w = self.lock();
        w.node(path)?;
        Ok(w.children_of(path))
    }

    fn device_of(&self, path: &Path) -> Result<u64> {
        self.lock().device_of(path)
    }
}

impl Transport for MockFs {
    fn send_recv(&self, req: &SendRequest) -> Result<()> {
        let mut w = self.lock();
        let subvol = req.source.display().to_string();
        if w.dry_run {
            // Journal the request the way the real transport echoes the
            // command line, but touch nothing.
            w.records.push(SendRecord {
                source: req.source.clone(),
                dest_dir: req.dest_dir.clone(),
                parent: req.parent.clone(),
                clone_sources: req.clone_sources.clone(),
            });
            return Ok(());
        }
        if w.fail_sources.contains(&req.source) {
            return Err(CloneError::Transport {
                subvol,
                details: "mock: injected failure".to_string(),
            });
        }
        if w.node(&req.source)?.kind != NodeKind::Subvol {
            return Err(CloneError::Transport {
                subvol,
                details: "mock: send source is not a subvolume".to_string(),
            });
        }
        if !w.nodes.contains_key(&req.dest_dir) {
            return Err(CloneError::Transport {
                subvol,
                details: format!("mock: receive directory {} missing", req.dest_dir.display()),
            });
        }
        let name = req
            .source
            .file_name()
            .ok_or_else(|| CloneError::Transport {
                subvol: subvol.clone(),
                details: "mock: source has no basename".to_string(),
            })?;
        let dest = req.dest_dir.join(name);
        if w.nodes.contains_key(&dest) {
            return Err(CloneError::Transport {
                subvol,
                details: format!("mock: {} already exists", dest.display()),
            });
        }
        // Received subvolumes arrive read-only, per the wire protocol.
        w.copy_tree(&req.source, &dest, true);
        w.records.push(SendRecord {
            source: req.source.clone(),
            dest_dir: req.dest_dir.clone(),
            parent: req.parent.clone(),
            clone_sources: req.clone_sources.clone(),
        });
        w.events.push(MockEvent::Transfer {
            source: req.source.clone(),
        });
        Ok(())
    }
}
