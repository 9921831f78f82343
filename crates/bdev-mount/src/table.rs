//! Ordered container of filesystem entries.

use crate::parser::{self, looks_like_mountinfo};
use crate::{FsEntry, PathCache};
use bdev_error::{BdevError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Iteration direction. For mountinfo tables, backward iteration yields the
/// most recently mounted filesystem first — the usual correct answer for
/// "where is X mounted now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Parse-error callback: `(file, line number)`; return `true` to continue
/// parsing (every error is recoverable by default).
pub type ParserErrCb = Box<dyn Fn(&Path, usize) -> bool + Send + Sync>;

/// De-duplication flags for [`Table::uniq`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqFlags {
    /// Remove later mounted filesystems instead of earlier ones.
    pub forward: bool,
    /// Keep the parent/id relationship valid by reparenting children of
    /// removed duplicates (mountinfo tables only).
    pub keep_tree: bool,
}

/// A container of [`FsEntry`] items, usually representing one fstab, mtab
/// or mountinfo file. Insertion order is preserved.
#[derive(Default)]
pub struct Table {
    ents: Vec<Arc<FsEntry>>,
    cache: Option<Arc<PathCache>>,
    comms: bool,
    comm_intro: Option<String>,
    comm_tail: Option<String>,
    errcb: Option<ParserErrCb>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table file; the dialect (fstab vs mountinfo) is guessed per
    /// file from the first entry-looking line.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut tb = Self::new();
        tb.parse_file(path)?;
        Ok(tb)
    }

    // ── Container basics ────────────────────────────────────────────────

    #[must_use]
    pub fn nents(&self) -> usize {
        self.ents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ents.is_empty()
    }

    /// Append an entry (the table holds one reference per appearance).
    pub fn add(&mut self, fs: Arc<FsEntry>) {
        debug!(
            target: "bdev::mount::tab",
            source = fs.source().unwrap_or("none"),
            target = fs.target().unwrap_or("none"),
            "add entry"
        );
        self.ents.push(fs);
    }

    /// Remove an entry (pointer identity).
    pub fn remove(&mut self, fs: &Arc<FsEntry>) {
        self.ents.retain(|e| !Arc::ptr_eq(e, fs));
    }

    pub fn clear(&mut self) {
        self.ents.clear();
    }

    #[must_use]
    pub fn first(&self) -> Option<&Arc<FsEntry>> {
        self.ents.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Arc<FsEntry>> {
        self.ents.last()
    }

    /// Iterate in the given direction.
    pub fn iter_dir(&self, direction: Direction) -> Box<dyn Iterator<Item = &Arc<FsEntry>> + '_> {
        match direction {
            Direction::Forward => Box::new(self.ents.iter()),
            Direction::Backward => Box::new(self.ents.iter().rev()),
        }
    }

    /// Forward iteration (insertion order).
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<FsEntry>> {
        self.ents.iter()
    }

    /// First entry matching a caller predicate, in the given direction.
    #[must_use]
    pub fn find_next(
        &self,
        direction: Direction,
        pred: impl Fn(&FsEntry) -> bool,
    ) -> Option<&Arc<FsEntry>> {
        self.iter_dir(direction).find(|fs| pred(fs))
    }

    /// True when the table looks like kernel mountinfo (first entry has
    /// kernel identity fields and an fs-root).
    #[must_use]
    pub fn is_mountinfo(&self) -> bool {
        self.ents
            .first()
            .is_some_and(|fs| fs.is_kernel() && fs.root().is_some())
    }

    // ── Cache, comments, error callback ─────────────────────────────────

    /// Attach a shared canonicalization cache. Lookup functions use it for
    /// their canonical passes; without a cache only native comparisons are
    /// performed.
    pub fn set_cache(&mut self, cache: Arc<PathCache>) {
        self.cache = Some(cache);
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<PathCache>> {
        self.cache.as_ref()
    }

    pub(crate) fn cache_ref(&self) -> Option<&PathCache> {
        self.cache.as_deref()
    }

    /// Enable comment parsing: the intro block, per-entry comments and the
    /// trailing block are preserved.
    pub fn enable_comments(&mut self, enable: bool) {
        self.comms = enable;
    }

    #[must_use]
    pub fn with_comments(&self) -> bool {
        self.comms
    }

    #[must_use]
    pub fn intro_comment(&self) -> Option<&str> {
        self.comm_intro.as_deref()
    }

    pub fn set_intro_comment(&mut self, comment: Option<String>) {
        self.comm_intro = comment;
    }

    #[must_use]
    pub fn trailing_comment(&self) -> Option<&str> {
        self.comm_tail.as_deref()
    }

    pub fn set_trailing_comment(&mut self, comment: Option<String>) {
        self.comm_tail = comment;
    }

    /// Install the parse-error callback; the default treats every parse
    /// error as recoverable and continues.
    pub fn set_parser_errcb(&mut self, cb: ParserErrCb) {
        self.errcb = Some(cb);
    }

    // ── Parsing ─────────────────────────────────────────────────────────

    /// Parse `path` and append its entries.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(target: "bdev::mount::tab", file = %path.display(), "parsing");
        self.parse_text(path, &text)
    }

    /// Parse in-memory table text (same dialect handling as files).
    pub fn parse_text(&mut self, path: &Path, text: &str) -> Result<()> {
        let mut comment_block: Option<String> = None;
        let mut seen_blank = false;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();

            if line.is_empty() {
                if self.comms && self.ents.is_empty() && comment_block.is_some() && !seen_blank {
                    // The intro comment is separated from the first entry's
                    // comment by a blank line.
                    self.comm_intro = comment_block.take();
                    seen_blank = true;
                }
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                if self.comms {
                    let block = comment_block.get_or_insert_with(String::new);
                    block.push_str(comment.trim_start());
                    block.push('\n');
                }
                continue;
            }

            let parsed = if looks_like_mountinfo(line) {
                parser::parse_mountinfo_line(line)
            } else {
                parser::parse_fstab_line(line)
            };

            match parsed {
                Ok(mut fs) => {
                    if self.comms && let Some(comment) = comment_block.take() {
                        fs.set_comment(comment);
                    }
                    self.add(Arc::new(fs));
                }
                Err(err) => {
                    debug!(
                        target: "bdev::mount::tab",
                        file = %path.display(),
                        line = lineno + 1,
                        %err,
                        "parse error"
                    );
                    let recover = self
                        .errcb
                        .as_ref()
                        .map_or(true, |cb| cb(path, lineno + 1));
                    if !recover {
                        return Err(BdevError::Parse {
                            file: path.display().to_string(),
                            line: lineno + 1,
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }

        if self.comms && let Some(block) = comment_block {
            self.comm_tail = Some(block);
        }
        Ok(())
    }

    // ── Mountinfo tree helpers ──────────────────────────────────────────

    /// The root filesystem entry: the one with the smallest parent ID
    /// (mountinfo tables only).
    #[must_use]
    pub fn root_entry(&self) -> Option<&Arc<FsEntry>> {
        if !self.is_mountinfo() {
            return None;
        }
        self.ents.iter().min_by_key(|fs| fs.parent_id())
    }

    /// The next child of `parent` in mount order (ascending mount ID),
    /// after `last_child_id`. Children equal to their parent are skipped
    /// (early-userspace rootfs can be its own parent).
    #[must_use]
    pub fn next_child(&self, parent: &FsEntry, last_child_id: Option<i32>) -> Option<&Arc<FsEntry>> {
        if !self.is_mountinfo() {
            return None;
        }
        let parent_id = parent.id();
        self.ents
            .iter()
            .filter(|fs| fs.parent_id() == parent_id && fs.id() != parent_id)
            .filter(|fs| last_child_id.is_none_or(|last| fs.id() > last))
            .min_by_key(|fs| fs.id())
    }

    /// All children of `parent` in mount order.
    #[must_use]
    pub fn children(&self, parent: &FsEntry) -> Vec<&Arc<FsEntry>> {
        let mut out = Vec::new();
        let mut last = None;
        while let Some(child) = self.next_child(parent, last) {
            last = Some(child.id());
            out.push(child);
        }
        out
    }

    // ── De-duplication ──────────────────────────────────────────────────

    /// De-duplicate without changing the relative order of survivors.
    /// `cmp` returns `true` when two entries are duplicates. The default
    /// keeps later mounted filesystems.
    pub fn uniq(&mut self, flags: UniqFlags, cmp: impl Fn(&FsEntry, &FsEntry) -> bool) {
        let keep_tree = flags.keep_tree && self.is_mountinfo();

        // Indices of entries that lose against an earlier entry in the
        // chosen direction.
        let n = self.ents.len();
        let order: Vec<usize> = if flags.forward {
            (0..n).collect()
        } else {
            (0..n).rev().collect()
        };

        let mut removed = vec![false; n];
        for (pos, &i) in order.iter().enumerate() {
            if removed[i] {
                continue;
            }
            for &j in &order[pos + 1..] {
                if !removed[j] && cmp(&self.ents[i], &self.ents[j]) {
                    removed[j] = true;
                    if keep_tree {
                        let (old, new) = (self.ents[j].id(), self.ents[j].parent_id());
                        self.move_parent(old, new);
                    }
                    debug!(
                        target: "bdev::mount::tab",
                        target = self.ents[j].target().unwrap_or("none"),
                        "remove duplicate"
                    );
                }
            }
        }

        let mut keep = removed.iter().map(|r| !r);
        self.ents.retain(|_| keep.next().unwrap_or(true));
    }

    fn move_parent(&mut self, old_id: i32, new_id: i32) {
        debug!(target: "bdev::mount::tab", old_id, new_id, "moving parent id");
        for fs in &mut self.ents {
            if fs.parent_id() == old_id {
                Arc::make_mut(fs).set_parent_id(new_id);
            }
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("nents", &self.ents.len())
            .field("mountinfo", &self.is_mountinfo())
            .field("comments", &self.comms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO: &str = "\
1 1 0:2 / / rw - rootfs rootfs rw
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 0:21 / /proc rw - proc proc rw
23 20 8:2 / /home rw - ext4 /dev/sda2 rw
25 23 8:3 / /home/backup rw - ext4 /dev/sda3 rw
";

    fn mountinfo_table() -> Table {
        let mut tb = Table::new();
        tb.parse_text(Path::new("mountinfo"), MOUNTINFO).expect("parse");
        tb
    }

    #[test]
    fn insertion_order_and_nents() {
        let tb = mountinfo_table();
        assert_eq!(tb.nents(), 5);
        let ids: Vec<i32> = tb.iter().map(|fs| fs.id()).collect();
        assert_eq!(ids, vec![1, 20, 21, 23, 25]);
        let rev: Vec<i32> = tb.iter_dir(Direction::Backward).map(|fs| fs.id()).collect();
        assert_eq!(rev, vec![25, 23, 21, 20, 1]);
    }

    #[test]
    fn mixed_dialect_detection_per_table() {
        let mut tb = Table::new();
        tb.parse_text(
            Path::new("fstab"),
            "LABEL=root / ext4 rw 0 1\n# comment\n\nproc /proc proc defaults 0 0\n",
        )
        .expect("parse");
        assert_eq!(tb.nents(), 2);
        assert!(!tb.is_mountinfo());
        assert!(mountinfo_table().is_mountinfo());
    }

    #[test]
    fn parse_errors_are_recoverable_by_default() {
        let mut tb = Table::new();
        tb.parse_text(
            Path::new("fstab"),
            "badline\n/dev/sda1 / ext4 rw 0 1\n",
        )
        .expect("recovered");
        assert_eq!(tb.nents(), 1);
    }

    #[test]
    fn parse_error_callback_can_abort() {
        let mut tb = Table::new();
        tb.set_parser_errcb(Box::new(|_, line| line != 1));
        let err = tb
            .parse_text(Path::new("fstab"), "badline\n")
            .expect_err("abort");
        assert!(matches!(err, BdevError::Parse { line: 1, .. }));
    }

    #[test]
    fn comments_are_attached_when_enabled() {
        let text = "\
# Intro line one
# Intro line two

# belongs to root
LABEL=root / ext4 rw 0 1
# trailing comment
";
        let mut tb = Table::new();
        tb.enable_comments(true);
        tb.parse_text(Path::new("fstab"), text).expect("parse");
        assert_eq!(
            tb.intro_comment(),
            Some("Intro line one\nIntro line two\n")
        );
        assert_eq!(
            tb.first().expect("entry").comment(),
            Some("belongs to root\n")
        );
        assert_eq!(tb.trailing_comment(), Some("trailing comment\n"));
    }

    #[test]
    fn root_entry_has_smallest_parent_id() {
        let tb = mountinfo_table();
        assert_eq!(tb.root_entry().expect("root").id(), 1);
    }

    #[test]
    fn children_walk_in_mount_order() {
        let tb = mountinfo_table();
        let parent = tb.find_next(Direction::Forward, |fs| fs.id() == 20).unwrap();
        let kids: Vec<i32> = tb.children(parent).iter().map(|fs| fs.id()).collect();
        assert_eq!(kids, vec![21, 23]);
    }

    #[test]
    fn self_parent_root_does_not_loop() {
        let tb = mountinfo_table();
        let rootfs = tb.find_next(Direction::Forward, |fs| fs.id() == 1).unwrap();
        // id 1 is its own parent; it must not be returned as its own child.
        let kids: Vec<i32> = tb.children(rootfs).iter().map(|fs| fs.id()).collect();
        assert_eq!(kids, vec![20]);
    }

    #[test]
    fn uniq_keeps_later_mounts_by_default() {
        let mut tb = Table::new();
        tb.parse_text(
            Path::new("mtab"),
            "/dev/sda1 /mnt ext4 rw 0 0\n/dev/sdb1 /mnt ext4 rw 0 0\n/dev/sdc1 /data ext4 rw 0 0\n",
        )
        .expect("parse");
        tb.uniq(UniqFlags::default(), |a, b| a.target() == b.target());
        let sources: Vec<_> = tb.iter().map(|fs| fs.source().unwrap()).collect();
        assert_eq!(sources, vec!["/dev/sdb1", "/dev/sdc1"]);
    }

    #[test]
    fn uniq_keep_tree_reparents_children() {
        let mut tb = Table::new();
        tb.parse_text(
            Path::new("mountinfo"),
            "\
1 0 8:1 / / rw - ext4 /dev/sda1 rw
2 1 8:2 / /mnt rw - ext4 /dev/sdb1 rw
3 1 8:3 / /mnt rw - ext4 /dev/sdc1 rw
4 2 8:4 / /mnt/sub rw - ext4 /dev/sdd1 rw
",
        )
        .expect("parse");
        tb.uniq(
            UniqFlags { forward: false, keep_tree: true },
            |a, b| a.target() == b.target(),
        );
        // Entry 2 lost against the later entry 3; its child 4 now hangs off
        // 2's parent (1).
        let ids: Vec<i32> = tb.iter().map(|fs| fs.id()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        let four = tb.find_next(Direction::Forward, |fs| fs.id() == 4).unwrap();
        assert_eq!(four.parent_id(), 1);
    }
}
