//! Shared test infrastructure for btrfs-clone.
//!
//! Provides:
//! - `CmdResult` + `run_cli_case()` — integration test CLI runner
//! - mock-world builders for orchestrator scenarios

// Not every test binary uses every item; suppress dead-code warnings for the
// shared module.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use btrfs_clone::platform::mock::MockFs;
use btrfs_clone::subvol::model::Subvolume;

// ──────────────────── CLI test runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_btrfs-clone") {
        let p = PathBuf::from(path);
        if p.exists() {
            return p;
        }
    }

    let exe_name = if cfg!(windows) {
        "btrfs-clone.exe"
    } else {
        "btrfs-clone"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!(
            "unable to resolve btrfs-clone binary path for integration test \
             (checked CARGO_BIN_EXE_btrfs-clone and debug sibling path)"
        ),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("btrfs-clone-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute btrfs-clone command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── mock world builders ────────────────────

pub const SRC: &str = "/src";
pub const DST: &str = "/dst";

/// A subvolume record with explicit generations.
pub fn subvol(
    id: u64,
    path: &str,
    uuid: &str,
    parent_uuid: Option<&str>,
    gen: u64,
    ogen: u64,
    ro: bool,
) -> Subvolume {
    Subvolume {
        path: path.to_string(),
        id,
        parent_id: 5,
        uuid: uuid.to_string(),
        parent_uuid: parent_uuid.map(str::to_string),
        gen,
        ogen,
        ro,
    }
}

/// A quiet read-only snapshot record.
pub fn snapshot_of(id: u64, path: &str, uuid: &str, origin: &str, ogen: u64) -> Subvolume {
    subvol(id, path, uuid, Some(origin), ogen + 1, ogen, true)
}

/// Source and target mounts with the given source subvolumes seeded.
pub fn world_with(subvols: &[Subvolume]) -> MockFs {
    let fs = MockFs::new();
    fs.add_mount(SRC, "uuid-src", 1);
    fs.add_mount(DST, "uuid-dst", 2);
    for sv in subvols {
        fs.seed_subvol(Path::new(SRC), sv.clone());
    }
    fs
}

/// The send order of real subvolume transfers, as source-relative paths.
/// The first record is always the bootstrap snapshot and is dropped.
pub fn transfer_paths(fs: &MockFs) -> Vec<String> {
    fs.records()
        .into_iter()
        .skip(1)
        .map(|r| {
            r.source
                .strip_prefix(SRC)
                .expect("transfer from source mount")
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}
