//! Top-of-filesystem bootstrap.
//!
//! The top of a btrfs filesystem cannot be sent directly, so it is
//! snapshotted under a random read-only name, transferred like any other
//! subvolume, and then either promoted into the target root (default) or
//! kept as a named subvolume. The source-side snapshot lives only for the
//! duration of the run; a guard deletes it on every exit path.

use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::core::report::Reporter;
use crate::core::token::{random_token, TOKEN_LEN};
use crate::platform::ops::FsOps;
use crate::transfer::transport::{SendRequest, Transport};

/// Deletes the bootstrap snapshot on the source when dropped.
pub struct SnapshotGuard<'a> {
    ops: &'a dyn FsOps,
    path: PathBuf,
    reporter: Reporter,
    released: bool,
}

impl<'a> SnapshotGuard<'a> {
    fn new(ops: &'a dyn FsOps, path: PathBuf, reporter: Reporter) -> Self {
        Self {
            ops,
            path,
            reporter,
            released: false,
        }
    }

    /// Explicit removal for the clean-shutdown path.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.ops.delete_subvolume(&self.path) {
            self.reporter.warn(&format!(
                "could not remove bootstrap snapshot {}: {e}",
                self.path.display()
            ));
        }
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// What the bootstrap left behind on the target.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// Random name of the bootstrap snapshot.
    pub snapshot_name: String,
    /// Base directory for all subsequent transfers: the target root after
    /// promotion, or the kept snapshot.
    pub target_base: PathBuf,
    /// Set when `--toplevel` kept the received snapshot in place.
    pub kept_snapshot: Option<PathBuf>,
}

/// Snapshot, transfer, and promote (or keep) the top-of-filesystem.
pub fn bootstrap_toplevel<'a>(
    ops: &'a dyn FsOps,
    transport: &dyn Transport,
    src_root: &Path,
    tgt_root: &Path,
    keep_toplevel: bool,
    dry_run: bool,
    reporter: &Reporter,
) -> Result<(BootstrapOutcome, SnapshotGuard<'a>)> {
    let name = random_token(TOKEN_LEN);
    let snap_path = src_root.join(&name);

    ops.snapshot(src_root, &snap_path, true)?;
    let guard = SnapshotGuard::new(ops, snap_path.clone(), reporter.clone());

    transport.send_recv(&SendRequest {
        source: snap_path,
        dest_dir: tgt_root.to_path_buf(),
        parent: None,
        clone_sources: Vec::new(),
        log_name: name.clone(),
    })?;

    let received = tgt_root.join(&name);
    ops.set_ro(&received, false)?;

    if keep_toplevel {
        reporter.info(&format!(
            "top level of the source kept as {}",
            received.display()
        ));
        let outcome = BootstrapOutcome {
            snapshot_name: name,
            target_base: received.clone(),
            kept_snapshot: Some(received),
        };
        return Ok((outcome, guard));
    }

    if dry_run {
        reporter.detail("dry run: top level promotion skipped");
        let outcome = BootstrapOutcome {
            snapshot_name: name,
            target_base: tgt_root.to_path_buf(),
            kept_snapshot: None,
        };
        return Ok((outcome, guard));
    }

    promote(ops, &received, tgt_root, reporter)?;

    Ok((
        BootstrapOutcome {
            snapshot_name: name,
            target_base: tgt_root.to_path_buf(),
            kept_snapshot: None,
        },
        guard,
    ))
}

/// Move every same-device entry of the received snapshot into the target
/// root, then drop the emptied snapshot.
fn promote(
    ops: &dyn FsOps,
    received: &Path,
    tgt_root: &Path,
    reporter: &Reporter,
) -> Result<()> {
    let base_dev = ops.device_of(received)?;
    for entry in ops.read_dir(received)? {
        let Some(file_name) = entry.file_name() else {
            continue;
        };
        match ops.device_of(&entry) {
            Ok(dev) if dev == base_dev => {
                // On a resumed run the target root already carries promoted
                // entries; a refused move is not worth aborting over.
                if let Err(e) = ops.rename(&entry, &tgt_root.join(file_name)) {
                    reporter.warn(&format!("cannot promote {}: {e}", entry.display()));
                }
            }
            Ok(_) => {
                // A mount hiding under the received tree; not ours to move.
                reporter.detail(&format!("skipping {} (different device)", entry.display()));
            }
            Err(e) => {
                reporter.warn(&format!("cannot stat {}: {e}", entry.display()));
            }
        }
    }
    if let Err(e) = ops.delete_subvolume(received) {
        reporter.warn(&format!(
            "could not remove promoted snapshot {}: {e}",
            received.display()
        ));
    }
    Ok(())
}
