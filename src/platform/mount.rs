//! Root-mount provider: mount the top-of-filesystem of a btrfs filesystem
//! under a fresh temporary directory.
//!
//! The filesystems do not need to be mounted by their top subvolume; this
//! remounts `subvolid=5` by UUID on a private mount point. Unless disabled,
//! the process first unshares its mount namespace so the temporary mounts
//! never leak into the host namespace. Teardown is lazy (`umount -l`) and
//! idempotent.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::errors::{CloneError, Result};
use crate::core::report::Reporter;
use crate::platform::ops::FsOps;

/// Detach this process's mount namespace and mark mounts private, so the
/// temporary root mounts stay invisible to the rest of the system.
pub fn unshare_mount_namespace() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWNS).map_err(|e| {
            CloneError::Unshare {
                details: e.to_string(),
            }
        })?;
        // Without this, shared propagation would replay our mounts into the
        // parent namespace anyway.
        let status = Command::new("mount")
            .args(["--make-rprivate", "/"])
            .status()
            .map_err(|e| CloneError::Unshare {
                details: e.to_string(),
            })?;
        if !status.success() {
            return Err(CloneError::Unshare {
                details: format!("mount --make-rprivate exited {status}"),
            });
        }
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(CloneError::Unshare {
            details: "mount namespaces are Linux-only".to_string(),
        })
    }
}

/// A mounted top-of-filesystem, unmounted and removed on drop.
pub struct RootMount {
    fs_uuid: String,
    mountpoint: PathBuf,
    reporter: Reporter,
    released: bool,
}

impl RootMount {
    #[must_use]
    pub fn fs_uuid(&self) -> &str {
        &self.fs_uuid
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.mountpoint
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let status = Command::new("umount")
            .args(["-l"])
            .arg(&self.mountpoint)
            .status();
        match status {
            Ok(s) if s.success() => {
                if let Err(e) = std::fs::remove_dir(&self.mountpoint) {
                    self.reporter.warn(&format!(
                        "cannot remove mountpoint {}: {e}",
                        self.mountpoint.display()
                    ));
                }
            }
            Ok(s) => self.reporter.warn(&format!(
                "umount {} exited {s}",
                self.mountpoint.display()
            )),
            Err(e) => self
                .reporter
                .warn(&format!("umount {} failed: {e}", self.mountpoint.display())),
        }
    }
}

impl Drop for RootMount {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Locate the filesystem under `mnt` and mount its top (`subvolid=5`) on a
/// fresh temporary directory.
pub fn mount_root_subvol(
    ops: &dyn FsOps,
    mnt: &Path,
    reporter: &Reporter,
) -> Result<RootMount> {
    let fs_uuid = ops.filesystem_uuid(mnt)?;
    let tmp = tempfile::Builder::new()
        .prefix("btrfs-clone-")
        .tempdir()
        .map_err(|e| CloneError::io(std::env::temp_dir(), e))?
        // The directory must outlive tempfile's cleanup: the mount guard
        // owns removal.
        .into_path();

    let status = Command::new("mount")
        .args(["-o", "subvolid=5"])
        .arg(format!("UUID={fs_uuid}"))
        .arg(&tmp)
        .status()
        .map_err(|e| CloneError::Mount {
            mount: mnt.to_path_buf(),
            details: e.to_string(),
        })?;
    if !status.success() {
        let _ = std::fs::remove_dir(&tmp);
        return Err(CloneError::Mount {
            mount: mnt.to_path_buf(),
            details: format!("mount exited {status}"),
        });
    }
    reporter.detail(&format!(
        "filesystem {fs_uuid} mounted on {}",
        tmp.display()
    ));
    Ok(RootMount {
        fs_uuid,
        mountpoint: tmp,
        reporter: reporter.clone(),
        released: false,
    })
}
