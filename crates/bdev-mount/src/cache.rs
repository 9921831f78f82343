//! Canonicalized-path and evaluated-tag cache.
//!
//! One cache may be shared between several tables (each table holds an
//! `Arc`). Paths are canonicalized at most once; device tags are read at
//! most once per device, either by probing (scan) or through the
//! udev-maintained `/dev/disk/by-*` symlinks.

use bdev_probe::{ProbeOutcome, Prober};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Shared lookup cache for `find_*` operations.
#[derive(Debug, Default)]
pub struct PathCache {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    paths: HashMap<String, Option<String>>,
    /// NAME=value tags per canonical device path.
    tags: HashMap<String, Vec<(String, String)>>,
    probed: HashSet<String>,
}

impl PathCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Canonicalize `path`, remembering the result. A path that cannot be
    /// resolved (typically: it does not exist) is returned as-is when
    /// absolute — lookup passes still want to compare something — and
    /// yields `None` otherwise.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<String> {
        if let Some(hit) = self.inner.lock().paths.get(path) {
            return hit.clone();
        }
        let resolved = match std::fs::canonicalize(path) {
            Ok(real) => Some(real.to_string_lossy().into_owned()),
            Err(_) if path.starts_with('/') => Some(path.to_owned()),
            Err(_) => None,
        };
        self.inner
            .lock()
            .paths
            .insert(path.to_owned(), resolved.clone());
        resolved
    }

    /// Canonicalize a mount target (same rules as `resolve_path`).
    #[must_use]
    pub fn resolve_target(&self, path: &str) -> Option<String> {
        self.resolve_path(path)
    }

    /// Resolve a `TAG=VALUE` pair to a canonical device path through the
    /// udev symlink directories.
    #[must_use]
    pub fn resolve_tag(&self, name: &str, value: &str) -> Option<String> {
        let dir = match name {
            "LABEL" => "by-label",
            "UUID" => "by-uuid",
            "PARTLABEL" => "by-partlabel",
            "PARTUUID" => "by-partuuid",
            _ => return None,
        };
        let link = PathBuf::from("/dev/disk").join(dir).join(value);
        if !link.exists() {
            return None;
        }
        self.resolve_path(&link.to_string_lossy())
    }

    /// Resolve a device spec that may be either a path or `TAG=VALUE`.
    #[must_use]
    pub fn resolve_spec(&self, spec: &str) -> Option<String> {
        match bdev_types::TagSpec::parse(spec) {
            Ok(tag) => self.resolve_tag(&tag.name, &tag.value),
            Err(_) => self.resolve_path(spec),
        }
    }

    /// Probe `devname` and remember its tags. Repeated calls are no-ops.
    /// Errors (notably `PermissionDenied`) are reported so callers can
    /// fall back to udev evaluation.
    pub fn read_tags(&self, devname: &str) -> std::io::Result<()> {
        if self.inner.lock().probed.contains(devname) {
            return Ok(());
        }

        let mut pr = Prober::from_filename(devname).map_err(io_error)?;
        debug!(target: "bdev::mount::cache", devname, "reading device tags");
        let tags = match pr.do_safeprobe() {
            Ok(ProbeOutcome::Found) => pr
                .values()
                .map(|v| (v.name().to_owned(), v.as_str().into_owned()))
                .collect(),
            // Nothing recognized (or ambivalent): remember the device as
            // probed with no tags.
            Ok(ProbeOutcome::Done) | Err(bdev_error::BdevError::Ambivalent) => Vec::new(),
            Err(err) => return Err(io_error(err)),
        };

        let mut inner = self.inner.lock();
        inner.probed.insert(devname.to_owned());
        inner.tags.insert(devname.to_owned(), tags);
        Ok(())
    }

    /// True when a previously read device carries `tag == value`.
    #[must_use]
    pub fn device_has_tag(&self, devname: &str, tag: &str, value: &str) -> bool {
        self.inner
            .lock()
            .tags
            .get(devname)
            .is_some_and(|tags| tags.iter().any(|(n, v)| n == tag && v == value))
    }

    /// Seed tags for a device without probing (tests, pre-warmed caches).
    pub fn store_tags(&self, devname: &str, tags: Vec<(String, String)>) {
        let mut inner = self.inner.lock();
        inner.probed.insert(devname.to_owned());
        inner.tags.insert(devname.to_owned(), tags);
    }
}

fn io_error(err: bdev_error::BdevError) -> std::io::Error {
    match err {
        bdev_error::BdevError::Io(err) => err,
        other => std::io::Error::other(other.to_string()),
    }
}

/// Strip the last path component; `None` once nothing but the root would
/// remain.
#[must_use]
pub(crate) fn strip_last_component(path: &str) -> Option<String> {
    let parent = Path::new(path).parent()?;
    let s = parent.to_string_lossy();
    if s.is_empty() { None } else { Some(s.into_owned()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonexistent_absolute_paths_resolve_to_themselves() {
        let cache = PathCache::new();
        assert_eq!(
            cache.resolve_path("/no/such/path").as_deref(),
            Some("/no/such/path")
        );
        assert_eq!(cache.resolve_path("relative/nope"), None);
    }

    #[test]
    fn symlinks_are_canonicalized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::create_dir(&real).expect("mkdir");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let cache = PathCache::new();
        let resolved = cache
            .resolve_path(&link.to_string_lossy())
            .expect("resolved");
        assert_eq!(resolved, std::fs::canonicalize(&real).unwrap().to_string_lossy());
    }

    #[test]
    fn stored_tags_are_queryable() {
        let cache = PathCache::new();
        cache.store_tags(
            "/dev/fake",
            vec![("UUID".to_owned(), "abc".to_owned())],
        );
        assert!(cache.device_has_tag("/dev/fake", "UUID", "abc"));
        assert!(!cache.device_has_tag("/dev/fake", "UUID", "xyz"));
        assert!(!cache.device_has_tag("/dev/other", "UUID", "abc"));
    }

    #[test]
    fn strip_last_component_walks_to_root() {
        assert_eq!(
            strip_last_component("/home/alice/x").as_deref(),
            Some("/home/alice")
        );
        assert_eq!(strip_last_component("/home").as_deref(), Some("/"));
        assert_eq!(strip_last_component("/"), None);
    }
}
