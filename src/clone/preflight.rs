//! Pre-flight conflict checks: same filesystem, non-empty target.
//!
//! Both conflicts are fatal unless `--force` is given, in which case the
//! user gets a 10-second window to abort before the run proceeds.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::errors::{CloneError, Result};
use crate::core::options::CloneOptions;
use crate::core::report::Reporter;
use crate::platform::ops::FsOps;

/// The forced-continue abort window.
pub const ABORT_WINDOW: Duration = Duration::from_secs(10);

pub fn preflight(
    ops: &dyn FsOps,
    src_root: &Path,
    tgt_root: &Path,
    opts: &CloneOptions,
    reporter: &Reporter,
    interrupt: &AtomicBool,
    window: Duration,
) -> Result<()> {
    let src_uuid = ops.filesystem_uuid(src_root)?;
    let tgt_uuid = ops.filesystem_uuid(tgt_root)?;
    reporter.detail(&format!("source filesystem {src_uuid}"));
    reporter.detail(&format!("target filesystem {tgt_uuid}"));

    let mut conflicts: Vec<CloneError> = Vec::new();
    if src_uuid == tgt_uuid {
        conflicts.push(CloneError::SameFilesystem { uuid: src_uuid });
    }
    match ops.read_dir(tgt_root) {
        Ok(entries) if !entries.is_empty() => {
            conflicts.push(CloneError::TargetNotEmpty {
                path: tgt_root.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) => return Err(e),
    }

    if conflicts.is_empty() {
        return Ok(());
    }
    if !opts.force {
        return Err(conflicts.remove(0));
    }
    for conflict in &conflicts {
        reporter.warn(&format!("{conflict} (continuing because of --force)"));
    }
    wait_abort_window(reporter, interrupt, window)
}

fn wait_abort_window(
    reporter: &Reporter,
    interrupt: &AtomicBool,
    window: Duration,
) -> Result<()> {
    if window.is_zero() {
        return Ok(());
    }
    reporter.warn(&format!(
        "continuing in {} seconds, press Ctrl-C to abort",
        window.as_secs()
    ));
    let deadline = std::time::Instant::now() + window;
    while std::time::Instant::now() < deadline {
        if interrupt.load(Ordering::Relaxed) {
            return Err(CloneError::Interrupted);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockFs;

    fn opts(force: bool) -> CloneOptions {
        CloneOptions {
            force,
            ..CloneOptions::default()
        }
    }

    fn check(fs: &MockFs, force: bool) -> Result<()> {
        let interrupt = AtomicBool::new(false);
        preflight(
            fs,
            Path::new("/src"),
            Path::new("/dst"),
            &opts(force),
            &Reporter::quiet(),
            &interrupt,
            Duration::ZERO,
        )
    }

    #[test]
    fn distinct_empty_target_passes() {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-src", 1);
        fs.add_mount("/dst", "uuid-dst", 2);
        assert!(check(&fs, false).is_ok());
    }

    #[test]
    fn same_filesystem_is_fatal_without_force() {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-same", 1);
        fs.add_mount("/dst", "uuid-same", 2);
        let err = check(&fs, false).unwrap_err();
        assert_eq!(err.code(), "BFC-2001");
    }

    #[test]
    fn nonempty_target_is_fatal_without_force() {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-src", 1);
        fs.add_mount("/dst", "uuid-dst", 2);
        fs.add_dir("/dst/leftover");
        let err = check(&fs, false).unwrap_err();
        assert_eq!(err.code(), "BFC-2002");
    }

    #[test]
    fn force_downgrades_conflicts_to_warnings() {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-same", 1);
        fs.add_mount("/dst", "uuid-same", 2);
        fs.add_dir("/dst/leftover");
        assert!(check(&fs, true).is_ok());
    }

    #[test]
    fn interrupt_during_window_aborts() {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-same", 1);
        fs.add_mount("/dst", "uuid-same", 2);
        let interrupt = AtomicBool::new(true);
        let err = preflight(
            &fs,
            Path::new("/src"),
            Path::new("/dst"),
            &opts(true),
            &Reporter::quiet(),
            &interrupt,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.code(), "BFC-3101");
    }
}
