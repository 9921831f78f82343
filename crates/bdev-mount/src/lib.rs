#![forbid(unsafe_code)]
//! Mount-table model and lookup engine.
//!
//! Parses fstab/mtab and kernel mountinfo files into [`Table`]s of
//! [`FsEntry`] items and answers the questions mount utilities ask:
//! what is mounted where, which entry matches a source spec, what fs-root
//! will a bind mount get, and is this fstab entry already mounted.

mod cache;
mod entry;
mod lookup;
mod loopdev;
pub mod optstr;
pub mod parser;
mod table;

pub use cache::PathCache;
pub use entry::FsEntry;
pub use table::{Direction, ParserErrCb, Table, UniqFlags};

/// Path of the kernel mount table for the calling process.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";
/// Default fstab location.
pub const ETC_FSTAB: &str = "/etc/fstab";
