//! Everything that touches the outside world: the btrfs command layer, the
//! root-mount provider, and the in-memory mock used by tests.

pub mod mock;
pub mod mount;
pub mod ops;
