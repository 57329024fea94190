//! Validated run options assembled from the CLI surface.

#![allow(missing_docs)]

use std::path::PathBuf;

use clap::ValueEnum;
use serde::Serialize;

use crate::core::errors::{CloneError, Result};

/// The five cloning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Preserve the UUID-parent lineage: direct origin as parent, all
    /// ancestors as clone sources.
    Parent,
    /// Roots first, then newest-first depth-first over the snapshot lineage.
    Snapshot,
    /// Oldest-first post-order over the snapshot lineage.
    Chronological,
    /// Generation-ordered transfer with the full best-ancestor rule set.
    #[default]
    Generation,
    /// PARENT ordering with the clone-source set widened to every older
    /// lineage relative.
    Bruteforce,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Snapshot => "snapshot",
            Self::Chronological => "chronological",
            Self::Generation => "generation",
            Self::Bruteforce => "bruteforce",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the orchestrator needs to know about one clone run.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub strategy: StrategyKind,
    /// Keep the bootstrap snapshot as a named subvolume instead of promoting
    /// its contents into the target root.
    pub keep_toplevel: bool,
    pub force: bool,
    pub dry_run: bool,
    pub ignore_errors: bool,
    /// Fixed staging directory name; a random token when absent.
    pub snap_base: Option<String>,
    pub verbosity: u8,
    pub no_unshare: bool,
    /// gzip level for saved send/receive logs (0-9).
    pub log_compresslevel: u32,
    /// The btrfs utility binary.
    pub btrfs: PathBuf,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            keep_toplevel: false,
            force: false,
            dry_run: false,
            ignore_errors: false,
            snap_base: None,
            verbosity: 0,
            no_unshare: false,
            log_compresslevel: 6,
            btrfs: PathBuf::from("btrfs"),
        }
    }
}

impl CloneOptions {
    /// Check cross-field constraints the CLI parser cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.log_compresslevel > 9 {
            return Err(CloneError::InvalidOptions {
                details: format!(
                    "--log-compresslevel must be 0-9, got {}",
                    self.log_compresslevel
                ),
            });
        }
        if let Some(base) = &self.snap_base {
            if base.is_empty() || base.contains('/') || base == "." || base == ".." {
                return Err(CloneError::InvalidOptions {
                    details: format!("--snap-base must be a plain directory name, got {base:?}"),
                });
            }
        }
        if self.btrfs.as_os_str().is_empty() {
            return Err(CloneError::InvalidOptions {
                details: "btrfs binary path is empty".to_string(),
            });
        }
        Ok(())
    }
}
