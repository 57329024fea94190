//! The `FsOps` seam: every external effect the core needs, behind one trait.
//!
//! `BtrfsCli` is the production implementation (invokes the `btrfs` utility
//! and plain filesystem calls); the in-memory mock for tests lives in
//! `platform::mock`. Mutating operations honor dry-run by printing the
//! equivalent command instead of executing it; read-side operations always
//! run.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;

use crate::core::errors::{CloneError, Result};
use crate::core::report::Reporter;
use crate::subvol::model::{
    parse_list_table, parse_show_output, subvolume_from_parts, Subvolume,
};

/// External effects used by staging, bootstrap, guard, and orchestrator.
pub trait FsOps: Send + Sync {
    /// Enumerate all subvolumes of the filesystem mounted at `mnt`, ordered
    /// by generation-at-creation ascending.
    fn enumerate_subvolumes(&self, mnt: &Path) -> Result<Vec<Subvolume>>;

    /// UUID of the filesystem backing `mnt`.
    fn filesystem_uuid(&self, mnt: &Path) -> Result<String>;

    fn get_ro(&self, path: &Path) -> Result<bool>;
    fn set_ro(&self, path: &Path, ro: bool) -> Result<()>;

    /// Snapshot `src` at `dest`, optionally read-only.
    fn snapshot(&self, src: &Path, dest: &Path, readonly: bool) -> Result<()>;
    fn delete_subvolume(&self, path: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;
    /// Subvolume-preserving rename; never a deep copy.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    /// Device id of the filesystem object at `path`.
    fn device_of(&self, path: &Path) -> Result<u64>;
}

/// Production implementation driving the `btrfs` binary.
pub struct BtrfsCli {
    btrfs: PathBuf,
    dry_run: bool,
    reporter: Reporter,
}

impl BtrfsCli {
    #[must_use]
    pub fn new(btrfs: PathBuf, dry_run: bool, reporter: Reporter) -> Self {
        Self {
            btrfs,
            dry_run,
            reporter,
        }
    }

    /// Run a mutating btrfs command; under dry-run, print it instead.
    fn run(&self, args: &[&str]) -> Result<()> {
        let rendered = format!("{} {}", self.btrfs.display(), args.join(" "));
        self.reporter.detail(&rendered);
        if self.dry_run {
            return Ok(());
        }
        let status = Command::new(&self.btrfs)
            .args(args)
            .status()
            .map_err(|e| CloneError::Command {
                program: rendered.clone(),
                details: e.to_string(),
            })?;
        if !status.success() {
            return Err(CloneError::Command {
                program: rendered,
                details: format!("exit status {status}"),
            });
        }
        Ok(())
    }

    /// Run a read-side btrfs command and capture stdout. Always executes.
    fn output(&self, args: &[&str]) -> Result<String> {
        let rendered = format!("{} {}", self.btrfs.display(), args.join(" "));
        self.reporter.trace(&rendered);
        let out = Command::new(&self.btrfs)
            .args(args)
            .output()
            .map_err(|e| CloneError::Command {
                program: rendered.clone(),
                details: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(CloneError::Command {
                program: rendered,
                details: format!(
                    "exit status {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl FsOps for BtrfsCli {
    fn enumerate_subvolumes(&self, mnt: &Path) -> Result<Vec<Subvolume>> {
        let mnt_str = mnt.to_string_lossy();
        let raw = self.output(&["subvolume", "list", "-t", "--sort=ogen", &mnt_str])?;
        let rows = parse_list_table(&raw);
        let mut subvols = Vec::with_capacity(rows.len());
        for row in &rows {
            let full = mnt.join(&row.path);
            let show = self.output(&["subvolume", "show", &full.to_string_lossy()])?;
            subvols.push(subvolume_from_parts(row, &parse_show_output(&show))?);
        }
        Ok(subvols)
    }

    fn filesystem_uuid(&self, mnt: &Path) -> Result<String> {
        let raw = self.output(&["filesystem", "show", &mnt.to_string_lossy()])?;
        parse_filesystem_uuid(&raw).ok_or_else(|| CloneError::FilesystemUuid {
            mount: mnt.to_path_buf(),
            details: "no uuid in `filesystem show` output".to_string(),
        })
    }

    fn get_ro(&self, path: &Path) -> Result<bool> {
        let raw = self.output(&["property", "get", "-ts", &path.to_string_lossy(), "ro"])?;
        Ok(raw.trim() == "ro=true")
    }

    fn set_ro(&self, path: &Path, ro: bool) -> Result<()> {
        let value = if ro { "true" } else { "false" };
        self.run(&["property", "set", "-ts", &path.to_string_lossy(), "ro", value])
            .map_err(|e| CloneError::ReadOnlyToggle {
                path: path.to_path_buf(),
                details: e.to_string(),
            })
    }

    fn snapshot(&self, src: &Path, dest: &Path, readonly: bool) -> Result<()> {
        let src = src.to_string_lossy();
        let dest = dest.to_string_lossy();
        if readonly {
            self.run(&["subvolume", "snapshot", "-r", &src, &dest])
        } else {
            self.run(&["subvolume", "snapshot", &src, &dest])
        }
    }

    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        self.run(&["subvolume", "delete", &path.to_string_lossy()])
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.reporter.detail(&format!("mkdir -p {}", path.display()));
            return Ok(());
        }
        fs::create_dir_all(path).map_err(|e| CloneError::io(path, e))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.reporter.detail(&format!("rmdir {}", path.display()));
            return Ok(());
        }
        fs::remove_dir(path).map_err(|e| CloneError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.dry_run {
            self.reporter
                .detail(&format!("mv {} {}", from.display(), to.display()));
            return Ok(());
        }
        fs::rename(from, to).map_err(|e| CloneError::io(from, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| CloneError::io(path, e))? {
            entries.push(entry.map_err(|e| CloneError::io(path, e))?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn device_of(&self, path: &Path) -> Result<u64> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = fs::metadata(path).map_err(|e| CloneError::io(path, e))?;
            Ok(meta.dev())
        }
        #[cfg(not(unix))]
        {
            Err(CloneError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::Unsupported, "unix only"),
            ))
        }
    }
}

/// Extract the filesystem UUID from the first line of `btrfs filesystem
/// show` output.
#[must_use]
pub fn parse_filesystem_uuid(raw: &str) -> Option<String> {
    let re = Regex::new(r"uuid: (?P<uuid>[-a-f0-9]+)").ok()?;
    let first = raw.lines().next()?;
    re.captures(first)
        .map(|caps| caps["uuid"].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_uuid_from_show_header() {
        let raw = "Label: none  uuid: 12345678-dead-beef-cafe-0123456789ab\n\
                   \tTotal devices 1 FS bytes used 1.00GiB\n";
        assert_eq!(
            parse_filesystem_uuid(raw).as_deref(),
            Some("12345678-dead-beef-cafe-0123456789ab")
        );
    }

    #[test]
    fn filesystem_uuid_missing_yields_none() {
        assert_eq!(parse_filesystem_uuid("no uuid here\n"), None);
        assert_eq!(parse_filesystem_uuid(""), None);
    }

    #[test]
    fn filesystem_uuid_ignores_later_lines() {
        let raw = "Label: none\n\tsome devid uuid: aaaa-bbbb\n";
        assert_eq!(parse_filesystem_uuid(raw), None);
    }
}
