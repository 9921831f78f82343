//! One filesystem entry of an fstab, mtab or mountinfo table.

use crate::optstr;
use bdev_types::{Devno, TagSpec};
use std::fmt;

/// Filesystem types the kernel implements without a backing device.
const PSEUDO_FS: &[&str] = &[
    "autofs",
    "bdev",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "cpuset",
    "debugfs",
    "devfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "securityfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

/// Network filesystem types (canonical paths make no sense for these).
const NET_FS: &[&str] = &[
    "afs", "ceph", "cifs", "fuse.sshfs", "ncpfs", "nfs", "nfs4", "smb3", "smbfs",
];

/// One mount-table line: source, target, type, options, and the
/// mountinfo-only identity fields (ids, devno, fs-root).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsEntry {
    source: Option<String>,
    tag: Option<TagSpec>,
    target: Option<String>,
    fstype: Option<String>,
    options: Option<String>,
    vfs_options: Option<String>,
    fs_options: Option<String>,
    user_options: Option<String>,
    /// Mountinfo optional fields (`shared:42` and friends).
    attrs: Option<String>,
    freq: i32,
    passno: i32,
    /// Mountinfo mount ID (0 when not from the kernel).
    id: i32,
    parent_id: i32,
    devno: Devno,
    /// Fs-root: the subtree of the source filesystem visible at the target.
    root: Option<String>,
    comment: Option<String>,
    /// Set for entries parsed from a kernel table (mountinfo).
    kernel: bool,
}

impl FsEntry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devno: Devno::NONE,
            ..Self::default()
        }
    }

    // ── Source ──────────────────────────────────────────────────────────

    /// The raw source field (`/dev/sda1`, `LABEL=x`, `tmpfs`, …). `None`
    /// is equivalent to the literal `none`.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Source as a path; `None` for tagged (`LABEL=…`) sources.
    #[must_use]
    pub fn srcpath(&self) -> Option<&str> {
        if self.tag.is_some() {
            None
        } else {
            self.source.as_deref()
        }
    }

    /// Parsed `(name, value)` of a tagged source.
    #[must_use]
    pub fn tag(&self) -> Option<&TagSpec> {
        self.tag.as_ref()
    }

    /// Set the source; `TAG=VALUE` spellings are parsed into a tag.
    pub fn set_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        self.tag = TagSpec::parse(&source).ok();
        self.source = Some(source);
    }

    /// Source equality with the `none`/`NULL` equivalence of mount tables.
    #[must_use]
    pub fn streq_srcpath(&self, path: Option<&str>) -> bool {
        let this = match self.source.as_deref() {
            None | Some("none") => None,
            some => some,
        };
        let other = match path {
            None | Some("none") => None,
            some => some,
        };
        this == other
    }

    // ── Target ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = Some(target.into());
    }

    #[must_use]
    pub fn streq_target(&self, path: &str) -> bool {
        self.target.as_deref() == Some(path)
    }

    // ── Type & options ──────────────────────────────────────────────────

    #[must_use]
    pub fn fstype(&self) -> Option<&str> {
        self.fstype.as_deref()
    }

    pub fn set_fstype(&mut self, fstype: impl Into<String>) {
        self.fstype = Some(fstype.into());
    }

    /// The merged option string (mount options as fstab shows them).
    #[must_use]
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    pub fn set_options(&mut self, options: impl Into<String>) {
        self.options = Some(options.into());
    }

    #[must_use]
    pub fn vfs_options(&self) -> Option<&str> {
        self.vfs_options.as_deref()
    }

    pub fn set_vfs_options(&mut self, options: impl Into<String>) {
        self.vfs_options = Some(options.into());
        self.options = optstr::merge_options(self.vfs_options.as_deref(), self.fs_options.as_deref());
    }

    #[must_use]
    pub fn fs_options(&self) -> Option<&str> {
        self.fs_options.as_deref()
    }

    pub fn set_fs_options(&mut self, options: impl Into<String>) {
        self.fs_options = Some(options.into());
        self.options = optstr::merge_options(self.vfs_options.as_deref(), self.fs_options.as_deref());
    }

    #[must_use]
    pub fn user_options(&self) -> Option<&str> {
        self.user_options.as_deref()
    }

    pub fn set_user_options(&mut self, options: impl Into<String>) {
        self.user_options = Some(options.into());
    }

    /// Look an option up across the merged option string.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<Option<String>> {
        self.options
            .as_deref()
            .and_then(|opts| optstr::get_option(opts, name))
    }

    #[must_use]
    pub fn has_option(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    // ── Mountinfo fields ────────────────────────────────────────────────

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    #[must_use]
    pub fn parent_id(&self) -> i32 {
        self.parent_id
    }

    pub fn set_parent_id(&mut self, parent_id: i32) {
        self.parent_id = parent_id;
    }

    #[must_use]
    pub fn devno(&self) -> Devno {
        self.devno
    }

    pub fn set_devno(&mut self, devno: Devno) {
        self.devno = devno;
    }

    /// The fs-root (mountinfo field 4); `/` except for bind mounts and
    /// btrfs subvolumes.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn set_root(&mut self, root: impl Into<String>) {
        self.root = Some(root.into());
    }

    #[must_use]
    pub fn attrs(&self) -> Option<&str> {
        self.attrs.as_deref()
    }

    pub fn set_attrs(&mut self, attrs: impl Into<String>) {
        self.attrs = Some(attrs.into());
    }

    #[must_use]
    pub fn freq(&self) -> i32 {
        self.freq
    }

    pub fn set_freq(&mut self, freq: i32) {
        self.freq = freq;
    }

    #[must_use]
    pub fn passno(&self) -> i32 {
        self.passno
    }

    pub fn set_passno(&mut self, passno: i32) {
        self.passno = passno;
    }

    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// True for entries that came from the kernel (mountinfo).
    #[must_use]
    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    pub fn set_kernel(&mut self, kernel: bool) {
        self.kernel = kernel;
    }

    // ── Classification ──────────────────────────────────────────────────

    #[must_use]
    pub fn is_swaparea(&self) -> bool {
        self.fstype.as_deref() == Some("swap")
    }

    #[must_use]
    pub fn is_pseudofs(&self) -> bool {
        self.fstype
            .as_deref()
            .is_some_and(|t| PSEUDO_FS.binary_search(&t).is_ok())
    }

    #[must_use]
    pub fn is_netfs(&self) -> bool {
        self.fstype
            .as_deref()
            .is_some_and(|t| NET_FS.binary_search(&t).is_ok())
    }

    // ── Matching ────────────────────────────────────────────────────────

    /// Target match: native first, then both sides canonicalized through
    /// the cache.
    #[must_use]
    pub fn match_target(&self, path: &str, cache: Option<&crate::PathCache>) -> bool {
        let Some(target) = self.target.as_deref() else {
            return false;
        };
        if target == path {
            return true;
        }
        if let Some(cache) = cache {
            let cn_path = cache.resolve_path(path);
            let cn_target = cache.resolve_path(target);
            if let (Some(a), Some(b)) = (cn_path, cn_target) {
                return a == b;
            }
        }
        false
    }

    /// Source match: native, tag evaluation, and canonicalized paths.
    #[must_use]
    pub fn match_source(&self, source: &str, cache: Option<&crate::PathCache>) -> bool {
        if self.streq_srcpath(Some(source)) {
            return true;
        }

        // The caller may pass a TAG=VALUE spec.
        if let Ok(spec) = TagSpec::parse(source) {
            if self.tag.as_ref() == Some(&spec) {
                return true;
            }
            if let Some(cache) = cache
                && let Some(devname) = cache.resolve_tag(&spec.name, &spec.value)
                && self.streq_srcpath(Some(&devname))
            {
                return true;
            }
            return false;
        }

        let Some(cache) = cache else { return false };
        let Some(cn) = cache.resolve_path(source) else {
            return false;
        };

        // Entry holds a tag: evaluate it to a device name.
        if let Some(tag) = &self.tag {
            return cache
                .resolve_tag(&tag.name, &tag.value)
                .is_some_and(|dev| dev == cn);
        }

        self.srcpath()
            .and_then(|p| cache.resolve_path(p))
            .is_some_and(|p| p == cn)
    }
}

impl fmt::Display for FsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.source.as_deref().unwrap_or("none"),
            self.target.as_deref().unwrap_or("none"),
            self.fstype.as_deref().unwrap_or("auto"),
            self.options.as_deref().unwrap_or("defaults"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_source_is_parsed() {
        let mut fs = FsEntry::new();
        fs.set_source("LABEL=boot");
        assert_eq!(fs.source(), Some("LABEL=boot"));
        assert!(fs.srcpath().is_none());
        let tag = fs.tag().expect("tag");
        assert_eq!((tag.name.as_str(), tag.value.as_str()), ("LABEL", "boot"));

        fs.set_source("/dev/sda1");
        assert!(fs.tag().is_none());
        assert_eq!(fs.srcpath(), Some("/dev/sda1"));
    }

    #[test]
    fn none_source_equivalence() {
        let mut fs = FsEntry::new();
        fs.set_source("none");
        assert!(fs.streq_srcpath(None));
        assert!(fs.streq_srcpath(Some("none")));
        assert!(!fs.streq_srcpath(Some("/dev/sda1")));

        let empty = FsEntry::new();
        assert!(empty.streq_srcpath(Some("none")));
    }

    #[test]
    fn option_merging_and_lookup() {
        let mut fs = FsEntry::new();
        fs.set_vfs_options("rw,noatime");
        fs.set_fs_options("subvol=/data");
        assert_eq!(fs.options(), Some("rw,noatime,subvol=/data"));
        assert_eq!(fs.option("subvol"), Some(Some("/data".to_owned())));
        assert!(fs.has_option("rw"));
        assert!(!fs.has_option("bind"));
    }

    #[test]
    fn classification_lists_are_sorted_for_binary_search() {
        let mut pseudo = PSEUDO_FS.to_vec();
        pseudo.sort_unstable();
        assert_eq!(pseudo, PSEUDO_FS);
        let mut net = NET_FS.to_vec();
        net.sort_unstable();
        assert_eq!(net, NET_FS);

        let mut fs = FsEntry::new();
        fs.set_fstype("proc");
        assert!(fs.is_pseudofs());
        fs.set_fstype("nfs4");
        assert!(fs.is_netfs());
        fs.set_fstype("ext4");
        assert!(!fs.is_pseudofs() && !fs.is_netfs());
        fs.set_fstype("swap");
        assert!(fs.is_swaparea());
    }
}
