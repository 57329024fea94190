//! Send/receive transport: one sender process piped into one receiver.
//!
//! The stream never lands in our address space as a whole; the sender's
//! stdout is wired directly to the receiver's stdin. At -v and above each
//! child's stderr is captured into a gzip-compressed log file in the working
//! directory, named after the subvolume's tree path.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::core::errors::{CloneError, Result};
use crate::core::report::Reporter;

/// One send/receive invocation: source-side paths plus the receive directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendRequest {
    /// Absolute path of the subvolume on the source mount.
    pub source: PathBuf,
    /// Directory on the target the receiver runs in.
    pub dest_dir: PathBuf,
    /// Send parent, if any (source-side path).
    pub parent: Option<PathBuf>,
    /// Clone sources (source-side paths), already de-duplicated.
    pub clone_sources: Vec<PathBuf>,
    /// Basis for the saved log file names.
    pub log_name: String,
}

/// Executes a send of one subvolume into a receive at a directory.
pub trait Transport: Send + Sync {
    fn send_recv(&self, req: &SendRequest) -> Result<()>;
}

/// Production transport piping `btrfs send` into `btrfs receive`.
pub struct PipedTransport {
    btrfs: PathBuf,
    dry_run: bool,
    compresslevel: u32,
    reporter: Reporter,
}

impl PipedTransport {
    #[must_use]
    pub fn new(btrfs: PathBuf, dry_run: bool, compresslevel: u32, reporter: Reporter) -> Self {
        Self {
            btrfs,
            dry_run,
            compresslevel,
            reporter,
        }
    }

    fn send_args(&self, req: &SendRequest) -> Vec<String> {
        let mut args = vec!["send".to_string()];
        for _ in 0..self.reporter.verbosity() {
            args.push("-v".to_string());
        }
        if let Some(parent) = &req.parent {
            args.push("-p".to_string());
            args.push(parent.display().to_string());
        }
        for src in &req.clone_sources {
            args.push("-c".to_string());
            args.push(src.display().to_string());
        }
        args.push(req.source.display().to_string());
        args
    }

    fn recv_args(&self, req: &SendRequest) -> Vec<String> {
        let mut args = vec!["receive".to_string()];
        for _ in 0..self.reporter.verbosity() {
            args.push("-v".to_string());
        }
        args.push(req.dest_dir.display().to_string());
        args
    }

    /// Drain a child's stderr into a gzip log on a helper thread.
    fn spawn_log_writer(
        &self,
        child: &mut Child,
        log_path: PathBuf,
    ) -> Option<std::thread::JoinHandle<()>> {
        let mut stderr = child.stderr.take()?;
        let level = Compression::new(self.compresslevel);
        let reporter = self.reporter.clone();
        Some(std::thread::spawn(move || {
            let file = match std::fs::File::create(&log_path) {
                Ok(f) => f,
                Err(e) => {
                    reporter.warn(&format!("cannot create {}: {e}", log_path.display()));
                    return;
                }
            };
            let mut encoder = GzEncoder::new(file, level);
            if let Err(e) = std::io::copy(&mut stderr, &mut encoder) {
                reporter.warn(&format!("log capture for {} failed: {e}", log_path.display()));
            }
            if let Err(e) = encoder.finish().and_then(|f| {
                let mut f = f;
                f.flush()
            }) {
                reporter.warn(&format!("log flush for {} failed: {e}", log_path.display()));
            }
        }))
    }
}

impl Transport for PipedTransport {
    fn send_recv(&self, req: &SendRequest) -> Result<()> {
        let send_args = self.send_args(req);
        let recv_args = self.recv_args(req);
        self.reporter.info(&format!(
            "{} {} |\n\t {} {}",
            self.btrfs.display(),
            send_args.join(" "),
            self.btrfs.display(),
            recv_args.join(" ")
        ));
        if self.dry_run {
            return Ok(());
        }

        let capture_logs = self.reporter.verbosity() >= 1;
        let stderr_mode = || {
            if capture_logs {
                Stdio::piped()
            } else {
                Stdio::inherit()
            }
        };
        let subvol = req.source.display().to_string();
        let transport_err = |details: String| CloneError::Transport {
            subvol: subvol.clone(),
            details,
        };

        let mut sender = Command::new(&self.btrfs)
            .args(&send_args)
            .stdout(Stdio::piped())
            .stderr(stderr_mode())
            .spawn()
            .map_err(|e| transport_err(format!("cannot spawn sender: {e}")))?;
        let send_out = sender
            .stdout
            .take()
            .ok_or_else(|| transport_err("sender stdout unavailable".to_string()))?;

        let mut receiver = match Command::new(&self.btrfs)
            .args(&recv_args)
            .stdin(Stdio::from(send_out))
            .stderr(stderr_mode())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = sender.kill();
                let _ = sender.wait();
                return Err(transport_err(format!("cannot spawn receiver: {e}")));
            }
        };

        let mut log_threads = Vec::new();
        if capture_logs {
            let send_log = PathBuf::from(format!("btrfs-send-{}.log.gz", req.log_name));
            let recv_log = PathBuf::from(format!("btrfs-recv-{}.log.gz", req.log_name));
            log_threads.extend(self.spawn_log_writer(&mut sender, send_log));
            log_threads.extend(self.spawn_log_writer(&mut receiver, recv_log));
        }

        let recv_status = receiver
            .wait()
            .map_err(|e| transport_err(format!("waiting for receiver: {e}")))?;
        let send_status = sender
            .wait()
            .map_err(|e| transport_err(format!("waiting for sender: {e}")))?;
        for handle in log_threads {
            let _ = handle.join();
        }

        if !send_status.success() {
            return Err(transport_err(format!("sender exited {send_status}")));
        }
        if !recv_status.success() {
            return Err(transport_err(format!("receiver exited {recv_status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request() -> SendRequest {
        SendRequest {
            source: PathBuf::from("/mnt/src/snaps/day1"),
            dest_dir: PathBuf::from("/mnt/dst/stage/257"),
            parent: Some(PathBuf::from("/mnt/src/current")),
            clone_sources: vec![
                PathBuf::from("/mnt/src/current"),
                PathBuf::from("/mnt/src/snaps/day0"),
            ],
            log_name: "snaps-day1".to_string(),
        }
    }

    #[test]
    fn send_args_carry_parent_and_clone_flags() {
        let t = PipedTransport::new(PathBuf::from("btrfs"), true, 6, Reporter::quiet());
        let args = t.send_args(&request());
        assert_eq!(
            args,
            vec![
                "send",
                "-p",
                "/mnt/src/current",
                "-c",
                "/mnt/src/current",
                "-c",
                "/mnt/src/snaps/day0",
                "/mnt/src/snaps/day1",
            ]
        );
    }

    #[test]
    fn send_args_without_parent_have_no_p_flag() {
        let t = PipedTransport::new(PathBuf::from("btrfs"), true, 6, Reporter::quiet());
        let mut req = request();
        req.parent = None;
        req.clone_sources.clear();
        assert_eq!(t.send_args(&req), vec!["send", "/mnt/src/snaps/day1"]);
    }

    #[test]
    fn verbosity_adds_v_flags_to_both_sides() {
        let t = PipedTransport::new(PathBuf::from("btrfs"), true, 6, Reporter::new(2, false));
        let mut req = request();
        req.parent = None;
        req.clone_sources.clear();
        assert_eq!(
            t.send_args(&req),
            vec!["send", "-v", "-v", "/mnt/src/snaps/day1"]
        );
        assert_eq!(
            t.recv_args(&req),
            vec!["receive", "-v", "-v", "/mnt/dst/stage/257"]
        );
    }

    #[test]
    fn recv_args_point_at_dest_dir() {
        let t = PipedTransport::new(PathBuf::from("btrfs"), true, 6, Reporter::quiet());
        assert_eq!(t.recv_args(&request()), vec!["receive", "/mnt/dst/stage/257"]);
    }

    #[test]
    fn dry_run_executes_nothing() {
        // A nonsense binary path would fail to spawn; dry-run must not try.
        let t = PipedTransport::new(
            Path::new("/nonexistent/btrfs-binary").to_path_buf(),
            true,
            6,
            Reporter::quiet(),
        );
        assert!(t.send_recv(&request()).is_ok());
    }
}
