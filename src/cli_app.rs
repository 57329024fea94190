//! Top-level CLI definition and dispatch.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use btrfs_clone::clone::orchestrator::{install_interrupt_flag, CloneSummary, Orchestrator};
use btrfs_clone::clone::preflight::{preflight, ABORT_WINDOW};
use btrfs_clone::core::errors::Result;
use btrfs_clone::core::options::{CloneOptions, StrategyKind};
use btrfs_clone::core::report::Reporter;
use btrfs_clone::platform::mount::{mount_root_subvol, unshare_mount_namespace};
use btrfs_clone::platform::ops::{BtrfsCli, FsOps};
use btrfs_clone::strategy::strategy_for;
use btrfs_clone::subvol::graph::SubvolGraph;
use btrfs_clone::transfer::transport::PipedTransport;

/// Clone a btrfs filesystem onto another one via send/receive.
#[derive(Debug, Parser)]
#[command(
    name = "btrfs-clone",
    author,
    version,
    about = "Clone a mounted btrfs filesystem onto another one",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Mount point of the source filesystem.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Mount point of the target filesystem.
    #[arg(value_name = "TARGET")]
    target: PathBuf,
    /// Cloning strategy.
    #[arg(long, value_enum, default_value_t = StrategyKind::Generation)]
    strategy: StrategyKind,
    /// Keep the top-level snapshot as a named subvolume instead of promoting
    /// its contents into the target root.
    #[arg(long)]
    toplevel: bool,
    /// Proceed on identical-UUID or non-empty target, after a 10-second
    /// abort window.
    #[arg(long)]
    force: bool,
    /// Print planned external invocations without executing them.
    #[arg(long)]
    dry_run: bool,
    /// Downgrade send/receive failures to warnings and continue.
    #[arg(long)]
    ignore_errors: bool,
    /// Fixed staging directory name; an existing directory of that name is
    /// resumed into.
    #[arg(long, value_name = "NAME")]
    snap_base: Option<String>,
    /// Increase verbosity.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Skip mount-namespace unsharing (for callers that already unshared).
    #[arg(long)]
    no_unshare: bool,
    /// Compression level for saved send/receive logs (0-9).
    #[arg(long, default_value_t = 6, value_name = "N")]
    log_compresslevel: u32,
    /// btrfs utility binary; overrides the BTRFS environment variable.
    #[arg(long, value_name = "PATH")]
    btrfs: Option<PathBuf>,
    /// Print the transfer plan as JSON and exit without transferring.
    #[arg(long)]
    json: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

fn options_from(cli: &Cli) -> Result<CloneOptions> {
    let btrfs = cli
        .btrfs
        .clone()
        .or_else(|| std::env::var_os("BTRFS").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("btrfs"));
    let opts = CloneOptions {
        strategy: cli.strategy,
        keep_toplevel: cli.toplevel,
        force: cli.force,
        dry_run: cli.dry_run,
        ignore_errors: cli.ignore_errors,
        snap_base: cli.snap_base.clone(),
        verbosity: cli.verbose,
        no_unshare: cli.no_unshare,
        log_compresslevel: cli.log_compresslevel,
        btrfs,
    };
    opts.validate()?;
    Ok(opts)
}

pub fn run(cli: &Cli) -> Result<()> {
    let opts = options_from(cli)?;
    if cli.no_color {
        colored::control::set_override(false);
    }
    let color = !cli.no_color && std::io::stdout().is_terminal();
    let reporter = Reporter::new(opts.verbosity, color);
    let interrupt = install_interrupt_flag();

    if !opts.no_unshare {
        unshare_mount_namespace()?;
    }

    let ops = BtrfsCli::new(opts.btrfs.clone(), opts.dry_run, reporter.clone());
    let src = mount_root_subvol(&ops, &cli.source, &reporter)?;
    let tgt = mount_root_subvol(&ops, &cli.target, &reporter)?;
    reporter.info(&format!(
        "OLD btrfs {} mounted on {}",
        src.fs_uuid(),
        src.path().display()
    ));
    reporter.info(&format!(
        "NEW btrfs {} mounted on {}",
        tgt.fs_uuid(),
        tgt.path().display()
    ));

    preflight(
        &ops,
        src.path(),
        tgt.path(),
        &opts,
        &reporter,
        &interrupt,
        ABORT_WINDOW,
    )?;

    if cli.json {
        return print_plan_json(&ops, src.path(), &opts);
    }

    let transport = PipedTransport::new(
        opts.btrfs.clone(),
        opts.dry_run,
        opts.log_compresslevel,
        reporter.clone(),
    );
    let orchestrator =
        Orchestrator::new(&ops, &transport, &opts, reporter.clone()).with_interrupt(interrupt);
    let summary = orchestrator.run(src.path(), tgt.path())?;
    print_summary(&reporter, &summary);
    Ok(())
}

/// Plan-only mode: enumerate, plan, and print the machine-readable plan.
fn print_plan_json(ops: &dyn FsOps, src_root: &Path, opts: &CloneOptions) -> Result<()> {
    println!("{}", render_plan_json(ops, src_root, opts)?);
    Ok(())
}

fn render_plan_json(ops: &dyn FsOps, src_root: &Path, opts: &CloneOptions) -> Result<String> {
    let graph = SubvolGraph::new(ops.enumerate_subvolumes(src_root)?)?;
    let plan = strategy_for(opts.strategy).plan(&graph)?;
    serde_json::to_string_pretty(&plan).map_err(|e| {
        btrfs_clone::core::errors::CloneError::Internal {
            details: format!("plan serialization: {e}"),
        }
    })
}

fn print_summary(reporter: &Reporter, summary: &CloneSummary) {
    reporter.info(&format!(
        "{}: {} planned, {} transferred, {} skipped",
        summary.strategy, summary.planned, summary.transferred, summary.skipped
    ));
    if let Some(kept) = &summary.kept_snapshot {
        reporter.info(&format!("top level kept as {}", kept.display()));
    }
    for path in &summary.failed {
        reporter.warn(&format!("failed: {path}"));
    }
    for path in &summary.stranded {
        reporter.warn(&format!("stranded in staging: {path}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrfs_clone::platform::mock::MockFs;
    use btrfs_clone::subvol::model::Subvolume;

    fn seeded_source() -> MockFs {
        let fs = MockFs::new();
        fs.add_mount("/src", "uuid-src", 1);
        fs.seed_subvol(
            Path::new("/src"),
            Subvolume {
                path: "current".to_string(),
                id: 256,
                parent_id: 5,
                uuid: "cur".to_string(),
                parent_uuid: None,
                gen: 100,
                ogen: 10,
                ro: false,
            },
        );
        fs.seed_subvol(
            Path::new("/src"),
            Subvolume {
                path: "snap1".to_string(),
                id: 257,
                parent_id: 5,
                uuid: "s1".to_string(),
                parent_uuid: Some("cur".to_string()),
                gen: 21,
                ogen: 20,
                ro: true,
            },
        );
        fs
    }

    #[test]
    fn plan_json_carries_strategy_and_ordered_steps() {
        let fs = seeded_source();
        let opts = CloneOptions {
            strategy: StrategyKind::Snapshot,
            ..CloneOptions::default()
        };
        let rendered = render_plan_json(&fs, Path::new("/src"), &opts).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&rendered).expect("plan must be valid JSON");

        assert_eq!(value["strategy"], "snapshot");
        assert_eq!(value["stages_via_flat_dir"], true);
        let steps = value["steps"].as_array().expect("steps array");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["path"], "current");
        assert!(steps[0]["parent"].is_null());
        assert_eq!(steps[1]["path"], "snap1");
        assert_eq!(steps[1]["parent"], "cur");
        assert_eq!(steps[1]["clone_sources"][0], "cur");
        assert!(steps[1]["reason"].is_string());
    }

    #[test]
    fn plan_json_reflects_the_chosen_strategy() {
        let fs = seeded_source();
        let opts = CloneOptions {
            strategy: StrategyKind::Parent,
            ..CloneOptions::default()
        };
        let rendered = render_plan_json(&fs, Path::new("/src"), &opts).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["strategy"], "parent");
        assert_eq!(value["stages_via_flat_dir"], false);
    }
}
