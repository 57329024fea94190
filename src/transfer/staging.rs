//! Flat staging area: receive subvolumes in any order, then reassemble the
//! identifier tree.
//!
//! Each transferred subvolume lands in a bucket directory named by its source
//! id. `commit` replays the `(parent_id, id)` order so every move happens
//! after its enclosing subvolume has been placed, which makes the transfer
//! order itself topology-agnostic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::core::report::Reporter;
use crate::platform::ops::FsOps;
use crate::subvol::model::{Subvolume, TOPLEVEL_ID};
use crate::transfer::transport::{SendRequest, Transport};

/// Summary of one `commit` pass.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub moved: usize,
    /// Final position already existed (resume).
    pub already_placed: usize,
    /// Subvolumes whose enclosing subvolume never got placed.
    pub stranded: Vec<String>,
    /// Non-fatal per-subvolume failures (vanished buckets, failed moves).
    pub failures: Vec<String>,
}

impl CommitReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stranded.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Moved,
    AlreadyPlaced,
    Failed,
}

/// Whether a rename failure means the destination is already occupied.
fn is_exists_error(err: &crate::core::errors::CloneError) -> bool {
    match err {
        crate::core::errors::CloneError::Io { source, .. } => matches!(
            source.kind(),
            std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
        ),
        _ => false,
    }
}

pub struct StagingArea<'a> {
    ops: &'a dyn FsOps,
    /// Root of the final tree on the target (the target mount, or the kept
    /// top-level snapshot).
    target_base: PathBuf,
    /// The staging root itself.
    base: PathBuf,
    dry_run: bool,
    reporter: Reporter,
}

impl<'a> StagingArea<'a> {
    /// Create (or reuse, for resume) the staging root `target_root/<name>`.
    pub fn create(
        ops: &'a dyn FsOps,
        target_root: &Path,
        target_base: &Path,
        name: &str,
        dry_run: bool,
        reporter: Reporter,
    ) -> Result<Self> {
        let base = target_root.join(name);
        ops.create_dir_all(&base)?;
        Ok(Self {
            ops,
            target_base: target_base.to_path_buf(),
            base,
            dry_run,
            reporter,
        })
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Bucket directory for one subvolume.
    #[must_use]
    pub fn bucket(&self, sv: &Subvolume) -> PathBuf {
        self.base.join(sv.id.to_string())
    }

    fn received_path(&self, sv: &Subvolume) -> PathBuf {
        self.bucket(sv).join(sv.basename())
    }

    /// Receive one subvolume into its bucket.
    ///
    /// Returns `false` when the bucket already holds a received subvolume
    /// (resume after error, or an idempotent rerun): the transfer is skipped.
    pub fn send(
        &self,
        transport: &dyn Transport,
        req: &SendRequest,
        sv: &Subvolume,
    ) -> Result<bool> {
        let received = self.received_path(sv);
        if self.ops.exists(&received) {
            self.reporter
                .info(&format!("{sv}: already staged, skipping"));
            return Ok(false);
        }
        self.ops.create_dir_all(&self.bucket(sv))?;
        transport.send_recv(req)?;
        if !sv.ro {
            // Received read-only by protocol; the source was read-write.
            self.ops.set_ro(&received, false)?;
        }
        Ok(true)
    }

    /// Move every staged subvolume to its final tree position.
    ///
    /// Invoked once, on clean shutdown. All per-subvolume problems are
    /// collected rather than propagated so one bad bucket cannot strand the
    /// rest.
    pub fn commit(&self, subvols: &[Subvolume]) -> Result<CommitReport> {
        let mut ordered: Vec<&Subvolume> = subvols.iter().collect();
        ordered.sort_by_key(|sv| (sv.parent_id, sv.id));

        let mut report = CommitReport::default();
        let mut done: HashSet<u64> = HashSet::new();

        for sv in ordered {
            let goal = self.target_base.join(&sv.path);
            let cur = self.received_path(sv);

            if sv.parent_id != TOPLEVEL_ID && !done.contains(&sv.parent_id) {
                self.reporter
                    .warn(&format!("{sv}: enclosing subvolume {} was never placed", sv.parent_id));
                report.stranded.push(sv.path.clone());
                continue;
            }

            if !self.ops.exists(&cur) {
                if self.ops.exists(&goal) {
                    // Bucket already committed by an earlier run.
                    done.insert(sv.id);
                    report.already_placed += 1;
                    continue;
                }
                if self.dry_run {
                    let _ = self.ops.rename(&cur, &goal);
                    done.insert(sv.id);
                    continue;
                }
                self.reporter
                    .error(&format!("{sv}: staged copy {} vanished", cur.display()));
                report.failures.push(sv.path.clone());
                continue;
            }

            match self.move_subvol(sv, &cur, &goal) {
                MoveOutcome::Moved => {
                    done.insert(sv.id);
                    report.moved += 1;
                    let bucket = self.bucket(sv);
                    if let Err(e) = self.ops.remove_dir(&bucket) {
                        self.reporter
                            .warn(&format!("cannot remove bucket {}: {e}", bucket.display()));
                    }
                }
                MoveOutcome::AlreadyPlaced => {
                    done.insert(sv.id);
                    report.already_placed += 1;
                }
                MoveOutcome::Failed => report.failures.push(sv.path.clone()),
            }
        }

        if let Err(e) = self.ops.remove_dir(&self.base) {
            self.reporter
                .warn(&format!("cannot remove staging root {}: {e}", self.base.display()));
        }
        Ok(report)
    }

    /// Rename with a read-write window around read-only subvolumes.
    ///
    /// The window is closed on every path: restored on the destination after
    /// a successful move, restored on the origin otherwise. A destination
    /// that already holds a non-empty tree means an earlier run committed
    /// this subvolume; that is a no-op success, not a failure. An empty
    /// placeholder directory (left where a received parent carried a nested
    /// subvolume) is replaced by the rename itself.
    fn move_subvol(&self, sv: &Subvolume, cur: &Path, goal: &Path) -> MoveOutcome {
        self.reporter
            .detail(&format!("{sv}: {} -> {}", cur.display(), goal.display()));

        if sv.ro {
            if let Err(e) = self.ops.set_ro(cur, false) {
                self.reporter.error(&format!("{sv}: cannot open read-write window: {e}"));
                return MoveOutcome::Failed;
            }
        }

        let outcome = match self.ops.rename(cur, goal) {
            Ok(()) => Ok(MoveOutcome::Moved),
            Err(e) if is_exists_error(&e) => Err((MoveOutcome::AlreadyPlaced, e)),
            Err(e) => Err((MoveOutcome::Failed, e)),
        };

        match outcome {
            Ok(moved) => {
                if sv.ro {
                    if let Err(e) = self.ops.set_ro(goal, true) {
                        self.reporter
                            .warn(&format!("{sv}: cannot restore read-only on {}: {e}", goal.display()));
                    }
                }
                moved
            }
            Err((result, e)) => {
                match result {
                    MoveOutcome::AlreadyPlaced => self.reporter.warn(&format!(
                        "{sv}: {} already exists, leaving the bucket alone",
                        goal.display()
                    )),
                    _ => self.reporter.error(&format!("{sv}: move failed: {e}")),
                }
                if sv.ro {
                    if let Err(e) = self.ops.set_ro(cur, true) {
                        self.reporter
                            .warn(&format!("{sv}: cannot restore read-only on {}: {e}", cur.display()));
                    }
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockFs;

    fn sv(id: u64, parent_id: u64, path: &str, uuid: &str, ro: bool) -> Subvolume {
        Subvolume {
            path: path.to_string(),
            id,
            parent_id,
            uuid: uuid.to_string(),
            parent_uuid: None,
            gen: 2,
            ogen: 1,
            ro,
        }
    }

    fn request(src: &str, dest: &Path) -> SendRequest {
        SendRequest {
            source: PathBuf::from(src),
            dest_dir: dest.to_path_buf(),
            parent: None,
            clone_sources: vec![],
            log_name: "test".to_string(),
        }
    }

    fn world() -> MockFs {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-src", 1);
        fs.add_mount("/dst", "uuid-dst", 2);
        fs
    }

    fn staging<'a>(fs: &'a MockFs) -> StagingArea<'a> {
        StagingArea::create(
            fs,
            Path::new("/dst"),
            Path::new("/dst"),
            "stage",
            false,
            Reporter::quiet(),
        )
        .unwrap()
    }

    #[test]
    fn send_receives_into_id_bucket() {
        let fs = world();
        let home = sv(256, 5, "home", "u-home", false);
        fs.seed_subvol(Path::new("/src"), home.clone());
        let st = staging(&fs);

        let sent = st
            .send(&fs, &request("/src/home", &st.bucket(&home)), &home)
            .unwrap();
        assert!(sent);
        assert!(fs.is_subvol(Path::new("/dst/stage/256/home")));
        // Read-write source: received copy flipped back to read-write.
        assert_eq!(fs.ro_of(Path::new("/dst/stage/256/home")), Some(false));
    }

    #[test]
    fn send_preserves_read_only_sources() {
        let fs = world();
        let snap = sv(257, 5, "snap", "u-snap", true);
        fs.seed_subvol(Path::new("/src"), snap.clone());
        let st = staging(&fs);

        st.send(&fs, &request("/src/snap", &st.bucket(&snap)), &snap)
            .unwrap();
        assert_eq!(fs.ro_of(Path::new("/dst/stage/257/snap")), Some(true));
    }

    #[test]
    fn send_skips_already_staged_buckets() {
        let fs = world();
        let home = sv(256, 5, "home", "u-home", false);
        fs.seed_subvol(Path::new("/src"), home.clone());
        let st = staging(&fs);
        let req = request("/src/home", &st.bucket(&home));

        assert!(st.send(&fs, &req, &home).unwrap());
        assert!(!st.send(&fs, &req, &home).unwrap(), "rerun must skip");
        assert_eq!(fs.records().len(), 1, "only one real transfer");
    }

    #[test]
    fn commit_places_parents_before_children() {
        let fs = world();
        let top = sv(256, 5, "top", "u-top", false);
        let inner = sv(257, 256, "top/inner", "u-inner", false);
        fs.seed_subvol(Path::new("/src"), top.clone());
        fs.seed_subvol(Path::new("/src"), inner.clone());
        let st = staging(&fs);

        // Receive in child-first order; commit must still work.
        st.send(&fs, &request("/src/top/inner", &st.bucket(&inner)), &inner)
            .unwrap();
        st.send(&fs, &request("/src/top", &st.bucket(&top)), &top)
            .unwrap();

        let report = st.commit(&[inner.clone(), top.clone()]).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.moved, 2);
        assert!(fs.is_subvol(Path::new("/dst/top")));
        assert!(fs.is_subvol(Path::new("/dst/top/inner")));
        assert!(!fs.exists(Path::new("/dst/stage")), "staging root removed");
    }

    #[test]
    fn commit_strands_children_of_missing_parents() {
        let fs = world();
        let inner = sv(257, 256, "top/inner", "u-inner", false);
        fs.seed_subvol(Path::new("/src"), inner.clone());
        let st = staging(&fs);
        st.send(&fs, &request("/src/top/inner", &st.bucket(&inner)), &inner)
            .unwrap();

        let report = st.commit(&[inner.clone()]).unwrap();
        assert_eq!(report.stranded, vec!["top/inner".to_string()]);
        assert_eq!(report.moved, 0);
        // The staging root stays behind with the stranded bucket inside.
        assert!(fs.exists(Path::new("/dst/stage/257/inner")));
    }

    #[test]
    fn commit_restores_read_only_after_move() {
        let fs = world();
        let snap = sv(257, 5, "snap", "u-snap", true);
        fs.seed_subvol(Path::new("/src"), snap.clone());
        let st = staging(&fs);
        st.send(&fs, &request("/src/snap", &st.bucket(&snap)), &snap)
            .unwrap();

        let report = st.commit(&[snap.clone()]).unwrap();
        assert!(report.is_clean());
        assert_eq!(fs.ro_of(Path::new("/dst/snap")), Some(true));
    }

    #[test]
    fn commit_treats_existing_goal_as_resume() {
        let fs = world();
        let home = sv(256, 5, "home", "u-home", false);
        fs.seed_subvol(Path::new("/src"), home.clone());
        fs.add_dir("/dst/home");
        let st = staging(&fs);

        let report = st.commit(&[home.clone()]).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.already_placed, 1);
    }

    #[test]
    fn commit_leaves_bucket_when_goal_is_occupied() {
        let fs = world();
        let home = sv(256, 5, "home", "u-home", false);
        fs.seed_subvol(Path::new("/src"), home.clone());
        let st = staging(&fs);
        st.send(&fs, &request("/src/home", &st.bucket(&home)), &home)
            .unwrap();
        // An earlier run already committed a populated copy.
        fs.add_dir("/dst/home");
        fs.add_file("/dst/home/data");

        let report = st.commit(&[home.clone()]).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.already_placed, 1);
        assert!(fs.exists(Path::new("/dst/stage/256/home")), "bucket kept");
    }

    #[test]
    fn commit_reports_vanished_buckets_and_continues() {
        let fs = world();
        let gone = sv(256, 5, "gone", "u-gone", false);
        let home = sv(257, 5, "home", "u-home", false);
        fs.seed_subvol(Path::new("/src"), gone.clone());
        fs.seed_subvol(Path::new("/src"), home.clone());
        let st = staging(&fs);
        // Only `home` actually staged.
        st.send(&fs, &request("/src/home", &st.bucket(&home)), &home)
            .unwrap();

        let report = st.commit(&[gone.clone(), home.clone()]).unwrap();
        assert_eq!(report.failures, vec!["gone".to_string()]);
        assert_eq!(report.moved, 1);
        assert!(fs.is_subvol(Path::new("/dst/home")));
    }

    #[test]
    fn commit_replaces_placeholder_dirs_from_parent_receive() {
        // A received parent subvolume carries the child's mount position as
        // an empty directory; the child's move must land on top of it.
        let fs = world();
        let top = sv(256, 5, "top", "u-top", false);
        let inner = sv(257, 256, "top/inner", "u-inner", false);
        fs.seed_subvol(Path::new("/src"), top.clone());
        fs.seed_subvol(Path::new("/src"), inner.clone());
        let st = staging(&fs);
        st.send(&fs, &request("/src/top", &st.bucket(&top)), &top)
            .unwrap();
        st.send(&fs, &request("/src/top/inner", &st.bucket(&inner)), &inner)
            .unwrap();

        let report = st.commit(&[top.clone(), inner.clone()]).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert!(fs.is_subvol(Path::new("/dst/top/inner")));
    }
}
