//! End-to-end wiring: bootstrap, enumeration, guard, strategy, transfers,
//! staging commit.
//!
//! Single-threaded by design; the only concurrency is inside the transport's
//! sender/receiver pair. Scoped guards (bootstrap snapshot, read-only guard)
//! release in reverse acquisition order on every exit path, and an interrupt
//! flag is polled between external operations so a signal unwinds through
//! the guards instead of leaking state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::errors::{CloneError, Result};
use crate::core::options::CloneOptions;
use crate::core::report::Reporter;
use crate::core::token::{random_token, TOKEN_LEN};
use crate::platform::ops::FsOps;
use crate::strategy::{strategy_for, TransferPlan, TransferStep};
use crate::subvol::graph::SubvolGraph;
use crate::subvol::model::Subvolume;
use crate::transfer::bootstrap::{bootstrap_toplevel, BootstrapOutcome};
use crate::transfer::guard::ReadOnlyGuard;
use crate::transfer::staging::StagingArea;
use crate::transfer::transport::{SendRequest, Transport};

/// Register SIGINT/SIGTERM so the main loop can poll for interruption.
///
/// Registration is best-effort; a failure only costs signal responsiveness.
#[must_use]
pub fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            eprintln!("warning: cannot register signal {signal}: {e}");
        }
    }
    flag
}

/// What one clone run did.
#[derive(Debug, Clone, Default)]
pub struct CloneSummary {
    pub strategy: &'static str,
    pub planned: usize,
    pub transferred: usize,
    /// Already present on the target (resume).
    pub skipped: usize,
    /// Paths that failed or were skipped because a dependency failed.
    pub failed: Vec<String>,
    /// Paths the staging commit could not place.
    pub stranded: Vec<String>,
    pub kept_snapshot: Option<PathBuf>,
}

impl CloneSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.stranded.is_empty()
    }
}

pub struct Orchestrator<'a> {
    ops: &'a dyn FsOps,
    transport: &'a dyn Transport,
    opts: &'a CloneOptions,
    reporter: Reporter,
    interrupt: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub fn new(
        ops: &'a dyn FsOps,
        transport: &'a dyn Transport,
        opts: &'a CloneOptions,
        reporter: Reporter,
    ) -> Self {
        Self {
            ops,
            transport,
            opts,
            reporter,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally registered interrupt flag (signal handler).
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Clone `src_root` onto `tgt_root`. Both are top-of-filesystem mounts.
    pub fn run(&self, src_root: &Path, tgt_root: &Path) -> Result<CloneSummary> {
        let (bootstrap, snapshot_guard) = bootstrap_toplevel(
            self.ops,
            self.transport,
            src_root,
            tgt_root,
            self.opts.keep_toplevel,
            self.opts.dry_run,
            &self.reporter,
        )?;

        let mut subvols = self.ops.enumerate_subvolumes(src_root)?;
        // The bootstrap snapshot is ours, not part of the source tree.
        subvols.retain(|sv| sv.path != bootstrap.snapshot_name);
        let graph = SubvolGraph::new(subvols)?;
        self.reporter
            .detail(&format!("{} subvolumes to clone", graph.len()));

        let strategy = strategy_for(self.opts.strategy);
        let plan = strategy.plan(&graph)?;

        let guard = ReadOnlyGuard::engage(
            self.ops,
            src_root,
            graph.subvols(),
            self.reporter.clone(),
        )?;

        let result = self.execute(&plan, &graph, src_root, tgt_root, &bootstrap);

        // Reverse acquisition order: transfers stop, sources revert, then
        // the bootstrap snapshot goes away.
        guard.release();
        snapshot_guard.release();

        let mut summary = result?;
        summary.strategy = plan.strategy;
        summary.planned = plan.steps.len();
        summary.kept_snapshot = bootstrap.kept_snapshot.clone();
        Ok(summary)
    }

    fn execute(
        &self,
        plan: &TransferPlan,
        graph: &SubvolGraph,
        src_root: &Path,
        tgt_root: &Path,
        bootstrap: &BootstrapOutcome,
    ) -> Result<CloneSummary> {
        let staging = if plan.stages_via_flat_dir {
            let name = self
                .opts
                .snap_base
                .clone()
                .unwrap_or_else(|| random_token(TOKEN_LEN));
            Some(StagingArea::create(
                self.ops,
                tgt_root,
                &bootstrap.target_base,
                &name,
                self.opts.dry_run,
                self.reporter.clone(),
            )?)
        } else {
            None
        };

        let mut summary = CloneSummary::default();
        let mut failed: HashSet<String> = HashSet::new();

        for step in &plan.steps {
            if self.interrupt.load(Ordering::Relaxed) {
                return Err(CloneError::Interrupted);
            }
            let sv = graph.get(&step.uuid).ok_or_else(|| CloneError::Internal {
                details: format!("planned uuid {} not in graph", step.uuid),
            })?;

            if let Some(dep) = step
                .parent
                .iter()
                .chain(step.clone_sources.iter())
                .find(|uuid| failed.contains(uuid.as_str()))
            {
                let dep_path = graph.get(dep).map_or("?", |d| d.path.as_str());
                self.reporter.warn(&format!(
                    "skipping {sv}: reference {dep_path} failed earlier"
                ));
                failed.insert(step.uuid.clone());
                summary.failed.push(sv.path.clone());
                continue;
            }

            self.reporter
                .detail(&format!("{sv}: parent by {}", step.reason));
            let req = self.request_for(step, sv, graph, src_root, staging.as_ref(), bootstrap);
            let sent = match &staging {
                Some(stage) => stage.send(self.transport, &req, sv),
                None => self.direct_send(&req, sv, &bootstrap.target_base),
            };
            match sent {
                Ok(true) => summary.transferred += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) if e.is_ignorable() && self.opts.ignore_errors => {
                    self.reporter.warn(&format!("{e} (ignored)"));
                    failed.insert(step.uuid.clone());
                    summary.failed.push(sv.path.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(stage) = &staging {
            let placeable: Vec<Subvolume> = graph
                .subvols()
                .iter()
                .filter(|sv| !failed.contains(sv.uuid.as_str()))
                .cloned()
                .collect();
            let report = stage.commit(&placeable)?;
            summary.stranded = report.stranded;
            summary.failed.extend(report.failures);
        }
        Ok(summary)
    }

    fn request_for(
        &self,
        step: &TransferStep,
        sv: &Subvolume,
        graph: &SubvolGraph,
        src_root: &Path,
        staging: Option<&StagingArea<'_>>,
        bootstrap: &BootstrapOutcome,
    ) -> SendRequest {
        let source_path = |uuid: &str| graph.get(uuid).map(|x| x.path_under(src_root));
        let dest_dir = match staging {
            Some(stage) => stage.bucket(sv),
            None => {
                let goal = bootstrap.target_base.join(&sv.path);
                goal.parent().map_or_else(
                    || bootstrap.target_base.clone(),
                    Path::to_path_buf,
                )
            }
        };
        SendRequest {
            source: sv.path_under(src_root),
            dest_dir,
            parent: step.parent.as_deref().and_then(source_path),
            clone_sources: step
                .clone_sources
                .iter()
                .filter_map(|uuid| source_path(uuid))
                .collect(),
            log_name: sv.log_name(),
        }
    }

    /// PARENT/BRUTEFORCE placement: receive straight at the final tree
    /// position. The receive directory is created when the `(ogen, id)`
    /// order did not materialize it yet (a tree-position parent that is not
    /// the lineage parent).
    fn direct_send(&self, req: &SendRequest, sv: &Subvolume, target_base: &Path) -> Result<bool> {
        let goal = target_base.join(&sv.path);
        if self.ops.exists(&goal) {
            // An empty placeholder (left where the promoted top level
            // carried this subvolume) must yield to the receive; anything
            // with content is a resumed transfer.
            if self.ops.remove_dir(&goal).is_err() {
                self.reporter
                    .info(&format!("{sv}: already on target, skipping"));
                return Ok(false);
            }
        }
        self.ops.create_dir_all(&req.dest_dir)?;
        self.transport.send_recv(req)?;
        if !sv.ro {
            self.ops.set_ro(&goal, false)?;
        }
        Ok(true)
    }
}
