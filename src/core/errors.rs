//! BFC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CloneError>;

/// Top-level error type for btrfs-clone.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("[BFC-1001] invalid options: {details}")]
    InvalidOptions { details: String },

    #[error("[BFC-1101] subvolume enumeration failed: {details}")]
    Enumeration { details: String },

    #[error("[BFC-1102] subvolume {subvol}: missing required field `{field}`")]
    MissingField { subvol: String, field: &'static str },

    #[error("[BFC-1201] cannot determine filesystem UUID for {mount}: {details}")]
    FilesystemUuid { mount: PathBuf, details: String },

    #[error("[BFC-1202] mount failure for {mount}: {details}")]
    Mount { mount: PathBuf, details: String },

    #[error("[BFC-1203] failed to unshare mount namespace: {details}")]
    Unshare { details: String },

    #[error("[BFC-2001] source and target are the same filesystem (UUID {uuid})")]
    SameFilesystem { uuid: String },

    #[error("[BFC-2002] target filesystem at {path} is not empty")]
    TargetNotEmpty { path: PathBuf },

    #[error("[BFC-2101] send/receive failed for {subvol}: {details}")]
    Transport { subvol: String, details: String },

    #[error("[BFC-2102] `{program}` failed: {details}")]
    Command { program: String, details: String },

    #[error("[BFC-2201] staging failure at {path}: {details}")]
    Staging { path: PathBuf, details: String },

    #[error("[BFC-2301] read-only toggle failed for {path}: {details}")]
    ReadOnlyToggle { path: PathBuf, details: String },

    #[error("[BFC-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BFC-3101] interrupted by signal")]
    Interrupted,

    #[error("[BFC-3900] internal invariant violated: {details}")]
    Internal { details: String },
}

impl CloneError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidOptions { .. } => "BFC-1001",
            Self::Enumeration { .. } => "BFC-1101",
            Self::MissingField { .. } => "BFC-1102",
            Self::FilesystemUuid { .. } => "BFC-1201",
            Self::Mount { .. } => "BFC-1202",
            Self::Unshare { .. } => "BFC-1203",
            Self::SameFilesystem { .. } => "BFC-2001",
            Self::TargetNotEmpty { .. } => "BFC-2002",
            Self::Transport { .. } => "BFC-2101",
            Self::Command { .. } => "BFC-2102",
            Self::Staging { .. } => "BFC-2201",
            Self::ReadOnlyToggle { .. } => "BFC-2301",
            Self::Io { .. } => "BFC-3001",
            Self::Interrupted => "BFC-3101",
            Self::Internal { .. } => "BFC-3900",
        }
    }

    /// Whether the failure is downgradeable under `--ignore-errors`.
    ///
    /// Only transport failures qualify; everything else either corrupts the
    /// plan (enumeration, internal) or is a user decision (pre-flight
    /// conflicts, interrupt).
    #[must_use]
    pub const fn is_ignorable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
