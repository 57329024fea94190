//! Read-only guard over the source subvolumes.
//!
//! Every subvolume that is read-write at enumeration time is forced
//! read-only for the duration of cloning, and reverted in reverse order on
//! release. Release runs on every exit path (explicit call or drop during
//! unwind), tolerates individual failures, and never touches subvolumes that
//! were read-only to begin with.

use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::core::report::Reporter;
use crate::platform::ops::FsOps;
use crate::subvol::model::Subvolume;

pub struct ReadOnlyGuard<'a> {
    ops: &'a dyn FsOps,
    reporter: Reporter,
    /// Paths we flipped to read-only, in acquisition order.
    flipped: Vec<PathBuf>,
    released: bool,
}

impl<'a> ReadOnlyGuard<'a> {
    /// Force all read-write subvolumes read-only.
    ///
    /// On a mid-way failure the guard is dropped by the caller's `?`, which
    /// reverts whatever was already flipped.
    pub fn engage(
        ops: &'a dyn FsOps,
        mnt: &Path,
        subvols: &[Subvolume],
        reporter: Reporter,
    ) -> Result<Self> {
        let mut guard = Self {
            ops,
            reporter,
            flipped: Vec::new(),
            released: false,
        };
        for sv in subvols {
            if sv.ro {
                continue;
            }
            let path = sv.path_under(mnt);
            guard.ops.set_ro(&path, true)?;
            guard.flipped.push(path);
        }
        Ok(guard)
    }

    /// Explicit release for the clean-shutdown path.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for path in self.flipped.iter().rev() {
            if let Err(e) = self.ops.set_ro(path, false) {
                self.reporter
                    .warn(&format!("could not restore read-write on {}: {e}", path.display()));
            }
        }
    }
}

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
