//! Loop-device backing-file checks via sysfs.

use bdev_types::Devno;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

fn loop_attr_dir(loop_path: &str) -> Option<PathBuf> {
    let meta = std::fs::metadata(loop_path).ok()?;
    if meta.mode() & libc::S_IFMT != libc::S_IFBLK {
        return None;
    }
    let devno = Devno(meta.rdev());
    Some(PathBuf::from(format!("/sys/dev/block/{devno}/loop")))
}

/// True when `loop_path` is a loop device backed by `backing` (at `offset`
/// when one is expected).
pub(crate) fn is_loopdev_used(loop_path: &str, backing: &str, offset: Option<u64>) -> bool {
    let Some(dir) = loop_attr_dir(loop_path) else {
        return false;
    };
    let Ok(backing_file) = std::fs::read_to_string(dir.join("backing_file")) else {
        return false;
    };

    let same_file = match (
        std::fs::canonicalize(backing_file.trim()),
        std::fs::canonicalize(backing),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => backing_file.trim() == backing,
    };
    if !same_file {
        return false;
    }

    match offset {
        None => true,
        Some(want) => std::fs::read_to_string(dir.join("offset"))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .is_some_and(|have| have == want),
    }
}
