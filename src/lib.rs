#![forbid(unsafe_code)]

//! btrfs-clone — clone a mounted btrfs filesystem onto another one.
//!
//! Orchestrates the filesystem's native send/receive primitives: for each
//! source subvolume a strategy decides which already-transferred subvolume
//! serves as the send parent and which ride along as clone sources, then a
//! flat staging area reassembles the source's tree-by-id layout on the
//! target. The strategy choice decides whether the target shares extents
//! aggressively or wastes space.

pub mod clone;
pub mod core;
pub mod platform;
pub mod strategy;
pub mod subvol;
pub mod transfer;
