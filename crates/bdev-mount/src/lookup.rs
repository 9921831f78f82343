//! The table lookup engine: multi-pass searches, bind-mount and btrfs
//! fs-root derivation, and the "is this fstab entry already mounted?"
//! algorithm.
//!
//! Every `find_*` function runs its first pass on unmodified paths/tags so
//! a table with both `LABEL=foo /foo` and `/dev/foo /foo` answers the way
//! mount(8) expects; the canonicalizing passes only run when the table has
//! a cache attached.

use crate::cache::strip_last_component;
use crate::table::{Direction, Table};
use crate::{FsEntry, loopdev};
use bdev_types::{Devno, TagSpec};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use tracing::debug;

impl Table {
    /// Find an entry by mount point.
    ///
    /// Pass 1 compares the native targets, pass 2 the canonicalized caller
    /// path, pass 3 canonicalizes the table targets too (skipping swap
    /// areas, kernel pseudo targets and `/`, which always matches).
    #[must_use]
    pub fn find_target(&self, path: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        if path.is_empty() {
            return None;
        }
        debug!(target: "bdev::mount::tab", path, "lookup TARGET");

        // Native targets.
        if let Some(fs) = self
            .iter_dir(direction)
            .find(|fs| fs.streq_target(path))
        {
            return Some(fs);
        }

        let cache = self.cache_ref()?;
        let cn = cache.resolve_path(path)?;

        // Canonicalized caller path vs native targets.
        if let Some(fs) = self.iter_dir(direction).find(|fs| fs.streq_target(&cn)) {
            return Some(fs);
        }

        // Canonicalize table targets too. Mountinfo targets are already
        // canonical (the kernel resolves them), and "/" would match any
        // ascent, so both are skipped.
        self.iter_dir(direction).find(|fs| {
            let Some(target) = fs.target() else {
                return false;
            };
            if fs.is_swaparea() || fs.is_kernel() || target == "/" {
                return false;
            }
            cache
                .resolve_target(target)
                .is_some_and(|resolved| resolved == cn)
        })
    }

    /// Find an entry by source path.
    ///
    /// Four passes: native paths, canonicalized caller path, tag evaluation
    /// (reading the caller device's tags, or evaluating every table tag
    /// through udev when the device is inaccessible), and canonicalized
    /// table paths (skipping network and pseudo filesystems).
    #[must_use]
    pub fn find_srcpath(&self, path: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        if path.is_empty() {
            return None;
        }
        debug!(target: "bdev::mount::tab", path, "lookup SRCPATH");

        // Native paths; count tagged entries on the way.
        let mut ntags = 0_usize;
        for fs in self.iter_dir(direction) {
            if fs.streq_srcpath(Some(path)) {
                return Some(fs);
            }
            if fs.tag().is_some() {
                ntags += 1;
            }
        }

        let cache = self.cache_ref()?;
        let cn = cache.resolve_path(path)?;
        let nents = self.nents();

        // Canonicalized caller path vs native entries.
        if ntags < nents {
            if let Some(fs) = self
                .iter_dir(direction)
                .find(|fs| fs.streq_srcpath(Some(&cn)))
            {
                return Some(fs);
            }
        }

        // Evaluated tags.
        if ntags > 0 {
            match cache.read_tags(&cn) {
                Ok(()) => {
                    // The device's tags are in the cache.
                    if let Some(fs) = self.iter_dir(direction).find(|fs| {
                        fs.tag()
                            .is_some_and(|t| cache.device_has_tag(&cn, &t.name, &t.value))
                    }) {
                        return Some(fs);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                    // Inaccessible device: evaluate every table tag through
                    // udev symlinks instead (expensive on huge tables).
                    if let Some(fs) = self.iter_dir(direction).find(|fs| {
                        fs.tag()
                            .and_then(|t| cache.resolve_tag(&t.name, &t.value))
                            .is_some_and(|dev| dev == cn)
                    }) {
                        return Some(fs);
                    }
                }
                Err(_) => {}
            }
        }

        // Canonicalized table paths.
        if ntags <= nents {
            return self.iter_dir(direction).find(|fs| {
                if fs.is_netfs() || fs.is_pseudofs() {
                    return false;
                }
                fs.srcpath()
                    .and_then(|p| cache.resolve_path(p))
                    .is_some_and(|p| p == cn)
            });
        }
        None
    }

    /// Find an entry by its tag. The first pass compares literal
    /// `(tag, value)` pairs; the second resolves the tag to a device name
    /// through udev and delegates to [`Table::find_srcpath`].
    #[must_use]
    pub fn find_tag(&self, tag: &str, value: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        if tag.is_empty() {
            return None;
        }
        debug!(target: "bdev::mount::tab", tag, value, "lookup TAG");

        if let Some(fs) = self.iter_dir(direction).find(|fs| {
            fs.tag()
                .is_some_and(|t| t.name == tag && t.value == value)
        }) {
            return Some(fs);
        }

        let devname = self.cache_ref()?.resolve_tag(tag, value)?;
        self.find_srcpath(&devname, direction)
    }

    /// Find an entry by a source spec that may be a path or `TAG=VALUE`.
    #[must_use]
    pub fn find_source(&self, spec: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        debug!(target: "bdev::mount::tab", spec, "lookup SOURCE");
        match TagSpec::parse(spec) {
            Ok(tag) => self.find_tag(&tag.name, &tag.value, direction),
            Err(_) => self.find_srcpath(spec, direction),
        }
    }

    /// Find the filesystem `path` lives on by peeling trailing path
    /// components until a target matches, falling back to `/`.
    #[must_use]
    pub fn find_mountpoint(&self, path: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        if path.is_empty() {
            return None;
        }
        debug!(target: "bdev::mount::tab", path, "lookup MOUNTPOINT");

        let mut mnt = path.to_owned();
        loop {
            if let Some(fs) = self.find_target(&mnt, direction) {
                return Some(fs);
            }
            match strip_last_component(&mnt) {
                Some(parent) => mnt = parent,
                None => break,
            }
        }
        self.find_target("/", direction)
    }

    /// Find an entry matching both source and target, with full (cache
    /// assisted) evaluation of every entry. More expensive than the other
    /// lookups.
    #[must_use]
    pub fn find_pair(&self, source: &str, target: &str, direction: Direction) -> Option<&Arc<FsEntry>> {
        if source.is_empty() || target.is_empty() {
            return None;
        }
        debug!(target: "bdev::mount::tab", source, tgt = target, "lookup PAIR");
        self.iter_dir(direction).find(|fs| {
            fs.match_target(target, self.cache_ref()) && fs.match_source(source, self.cache_ref())
        })
    }

    /// Find an entry by device number. Zero is a valid devno for pseudo
    /// filesystems, so no special-casing here.
    #[must_use]
    pub fn find_devno(&self, devno: Devno, direction: Direction) -> Option<&Arc<FsEntry>> {
        debug!(target: "bdev::mount::tab", devno = %devno, "lookup DEVNO");
        self.iter_dir(direction).find(|fs| fs.devno() == devno)
    }

    /// Find an entry matching a target and carrying `option=value`. Only
    /// native target comparison, no canonicalization.
    #[must_use]
    pub fn find_target_with_option(
        &self,
        path: &str,
        option: &str,
        value: &str,
        direction: Direction,
    ) -> Option<&Arc<FsEntry>> {
        if path.is_empty() || option.is_empty() {
            return None;
        }
        self.iter_dir(direction).find(|fs| {
            fs.streq_target(path)
                && fs
                    .option(option)
                    .is_some_and(|v| v.as_deref() == Some(value))
        })
    }

    // ── Fs-root derivation ──────────────────────────────────────────────

    /// Derive the fs-root the kernel will report for `entry` (an
    /// fstab-style line) after mounting, against this mountinfo table.
    ///
    /// For bind mounts the returned entry is the one backing the source
    /// mountpoint; for btrfs subvolumes the entry is `None` but the root is
    /// set. `None` altogether when the root cannot be derived.
    #[must_use]
    pub fn fs_root(&self, entry: &FsEntry, bind: bool) -> Option<(Option<Arc<FsEntry>>, String)> {
        debug!(
            target: "bdev::mount::tab",
            source = entry.source().unwrap_or("none"),
            bind,
            "lookup fs-root"
        );

        if bind {
            let src = self
                .cache_ref()
                .and_then(|c| entry.source().and_then(|s| c.resolve_spec(s)))
                .or_else(|| entry.source().map(str::to_owned))?;

            let mnt_fs = self.find_mountpoint(&src, Direction::Backward)?;
            let mnt = mnt_fs.target()?.to_owned();
            let mut root = remove_mountpoint_from_path(&src, &mnt);

            let src_fs = self.find_target(&mnt, Direction::Backward);
            if let Some(src_fs) = src_fs {
                // The bind source may itself sit on a bind mount or btrfs
                // subvolume; compose the roots to stay transitive.
                if let Some(src_root) = src_fs.root()
                    && src_root != "/"
                    && !root.starts_with(src_root)
                {
                    root = if root == "/" {
                        src_root.to_owned()
                    } else {
                        format!("{src_root}{root}")
                    };
                }
            }
            return Some((src_fs.cloned(), root));
        }

        if matches!(entry.fstype(), Some("btrfs") | Some("auto")) {
            if let Some(root) = self.btrfs_fs_root(entry) {
                return Some((None, root));
            }
            return None;
        }

        Some((None, "/".to_owned()))
    }

    /// btrfs subvolume root: prefer the `subvol=` reported by the kernel
    /// for the same target and subvolid; without `subvol`/`subvolid` the
    /// default-subvolume query would need a kernel interaction that older
    /// kernels lack, so derivation fails gracefully.
    fn btrfs_fs_root(&self, entry: &FsEntry) -> Option<String> {
        let vol = if let Some(Some(subvolid)) = entry.option("subvolid") {
            let target = entry.target()?;
            let target = self
                .cache_ref()
                .and_then(|c| c.resolve_target(target))
                .unwrap_or_else(|| target.to_owned());
            let mounted =
                self.find_target_with_option(&target, "subvolid", &subvolid, Direction::Backward)?;
            mounted.option("subvol")??
        } else if let Some(Some(subvol)) = entry.option("subvol") {
            subvol
        } else {
            debug!(target: "bdev::mount::tab", "no subvol/subvolid and no default-subvolume source");
            return None;
        };

        Some(if vol.starts_with('/') {
            vol
        } else {
            format!("/{vol}")
        })
    }

    // ── Is-mounted ──────────────────────────────────────────────────────

    /// Check whether an fstab entry is already mounted according to this
    /// (mountinfo) table. Swap areas are ignored. Matches on source path,
    /// device number or loop-device backing file, plus fs-root and target.
    #[must_use]
    pub fn is_fs_mounted(&self, fstab_fs: &FsEntry) -> bool {
        debug!(
            target: "bdev::mount::tab",
            source = fstab_fs.source().unwrap_or("none"),
            tgt = fstab_fs.target().unwrap_or("none"),
            "is_fs_mounted"
        );

        if fstab_fs.is_swaparea() || self.is_empty() {
            return false;
        }

        let mut src: Option<String> = None;
        let mut root: Option<String> = None;

        if self.is_mountinfo() {
            let bind = fstab_fs.has_option("bind") || fstab_fs.has_option("rbind");
            match self.fs_root(fstab_fs, bind) {
                Some((root_fs, derived)) => {
                    root = Some(derived);
                    src = root_fs.as_ref().and_then(|fs| fs.srcpath().map(str::to_owned));
                }
                // btrfs without subvol/subvolid needs the default-subvolume
                // query, which may be unavailable; report "not mounted"
                // rather than guessing.
                None if !bind && matches!(fstab_fs.fstype(), Some("btrfs") | Some("auto")) => {
                    return false;
                }
                None => {}
            }
        }

        let mut src = src.or_else(|| fstab_fs.source().map(str::to_owned));
        if !fstab_fs.is_pseudofs()
            && let Some(cache) = self.cache_ref()
            && let Some(resolved) = src.as_deref().and_then(|s| cache.resolve_spec(s))
        {
            src = Some(resolved);
        }

        let (Some(src), Some(tgt)) = (src, fstab_fs.target()) else {
            return false;
        };

        // Device number of the source, for entries that renamed the device.
        let mut devno = fstab_fs.devno();
        if devno.is_none() && root.is_some() {
            if let Ok(meta) = std::fs::metadata(&src)
                && meta.mode() & libc::S_IFMT == libc::S_IFBLK
            {
                devno = Devno(meta.rdev());
            }
        }

        let offset = fstab_fs
            .option("offset")
            .flatten()
            .and_then(|v| v.parse::<u64>().ok());

        let mut canonical_tgt: Option<Option<String>> = None;
        for fs in self.iter() {
            let mut eq = fs.streq_srcpath(Some(&src));
            if !eq && !devno.is_none() && fs.devno() == devno {
                eq = true;
            }
            if !eq {
                // Maybe the table's source is a loop device backing-file
                // mounted from our source file.
                let Some(srcpath) = fs.srcpath() else { continue };
                if !srcpath.starts_with("/dev/loop") {
                    continue;
                }
                if !loopdev::is_loopdev_used(srcpath, &src, offset) {
                    continue;
                }
            }

            if let Some(root) = &root {
                if fs.root() != Some(root.as_str()) {
                    continue;
                }
            }

            if fs.streq_target(tgt) {
                return true;
            }
            // Canonicalize the fstab target at most once.
            let cn = canonical_tgt
                .get_or_insert_with(|| self.cache_ref().and_then(|c| c.resolve_path(tgt)));
            if let Some(cn) = cn
                && fs.streq_target(cn)
            {
                return true;
            }
        }
        false
    }
}

/// Fs-root of a bind source `path` under mountpoint `mnt`: the path with
/// the mountpoint prefix stripped, `/` when they are equal.
fn remove_mountpoint_from_path(path: &str, mnt: &str) -> String {
    let rest = if mnt.len() > 1 {
        path.get(mnt.len()..).unwrap_or("")
    } else {
        path
    };
    let root = if rest.is_empty() { "/" } else { rest };
    debug!(target: "bdev::mount::tab", path, root, "fs-root for path");
    root.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountpoint_prefix_stripping() {
        assert_eq!(remove_mountpoint_from_path("/srcparent/a", "/srcparent"), "/a");
        assert_eq!(remove_mountpoint_from_path("/srcparent", "/srcparent"), "/");
        assert_eq!(remove_mountpoint_from_path("/src", "/"), "/src");
        assert_eq!(remove_mountpoint_from_path("/", "/"), "/");
    }
}
