#![forbid(unsafe_code)]
//! bdev public API facade.
//!
//! Re-exports the library surface through one crate: the low-level prober
//! (`probe`), the mount-table model (`mount`), the persistent device cache
//! (`cache`) and the shared primitives (`types`).

pub use bdev_cache as cache;
pub use bdev_error::{BdevError, Result};
pub use bdev_mount as mount;
pub use bdev_probe as probe;
pub use bdev_types as types;
