#![forbid(unsafe_code)]
//! Lookup-engine scenarios against fixture tables.

use bdev_mount::{Direction, FsEntry, PathCache, Table, parser};
use bdev_types::Devno;
use std::path::Path;
use std::sync::Arc;

const MOUNTINFO: &str = "\
17 1 8:1 / / rw,relatime - ext4 /dev/sda1 rw
22 17 0:5 / /proc rw - proc proc rw
23 17 0:21 / /home rw,noatime shared:1 - ext4 /dev/sda2 rw
24 23 0:30 / /home/shared rw - tmpfs tmpfs rw
";

fn mountinfo_table() -> Table {
    let mut tb = Table::new();
    tb.parse_text(Path::new("mountinfo"), MOUNTINFO)
        .expect("parse mountinfo");
    tb
}

fn fstab_entry(line: &str) -> FsEntry {
    parser::parse_fstab_line(line).expect("fstab line")
}

// ── Scenario: mountinfo lookup by target ────────────────────────────────────

#[test]
fn find_target_native() {
    let tb = mountinfo_table();
    let fs = tb.find_target("/home", Direction::Backward).expect("found");
    assert_eq!(fs.id(), 23);
    assert_eq!(fs.source(), Some("/dev/sda2"));
    assert!(tb.find_target("/nowhere", Direction::Backward).is_none());
}

#[test]
fn find_mountpoint_ascends_paths() {
    let tb = mountinfo_table();
    let fs = tb
        .find_mountpoint("/home/alice/x", Direction::Backward)
        .expect("found");
    assert_eq!(fs.id(), 23, "path ascent must stop at /home");

    let fs = tb
        .find_mountpoint("/home/shared/docs", Direction::Backward)
        .expect("found");
    assert_eq!(fs.id(), 24);

    let fs = tb.find_mountpoint("/etc/passwd", Direction::Backward).expect("root");
    assert_eq!(fs.id(), 17, "everything else falls back to /");
}

#[test]
fn direction_decides_between_overmounts() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
17 1 8:1 / / rw - ext4 /dev/sda1 rw
30 17 8:5 / /mnt rw - ext4 /dev/sdb1 rw
41 17 8:6 / /mnt rw - ext4 /dev/sdc1 rw
",
    )
    .expect("parse");

    // Backward: most recently mounted wins.
    let fs = tb.find_target("/mnt", Direction::Backward).expect("found");
    assert_eq!(fs.source(), Some("/dev/sdc1"));
    let fs = tb.find_target("/mnt", Direction::Forward).expect("found");
    assert_eq!(fs.source(), Some("/dev/sdb1"));
}

// ── Source lookups ──────────────────────────────────────────────────────────

#[test]
fn find_srcpath_and_source_dispatch() {
    let tb = mountinfo_table();
    let fs = tb
        .find_srcpath("/dev/sda2", Direction::Backward)
        .expect("found");
    assert_eq!(fs.target(), Some("/home"));

    // find_source dispatches paths to find_srcpath.
    let fs = tb.find_source("/dev/sda1", Direction::Backward).expect("found");
    assert_eq!(fs.target(), Some("/"));

    // "none" matches pseudo filesystems with no source... but our fixture
    // uses named sources, so nothing matches.
    assert!(tb.find_srcpath("/dev/missing", Direction::Backward).is_none());
}

#[test]
fn find_tag_literal_pass() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("fstab"),
        "\
LABEL=root / ext4 rw 0 1
UUID=6c96214b-a52f-4f0e-921d-0a1b2c3d4e5f /home ext4 rw 0 2
/dev/sdb1 /data ext4 rw 0 2
",
    )
    .expect("parse");

    let fs = tb
        .find_tag("UUID", "6c96214b-a52f-4f0e-921d-0a1b2c3d4e5f", Direction::Forward)
        .expect("found");
    assert_eq!(fs.target(), Some("/home"));

    let fs = tb.find_source("LABEL=root", Direction::Forward).expect("found");
    assert_eq!(fs.target(), Some("/"));

    assert!(tb.find_tag("LABEL", "nope", Direction::Forward).is_none());
}

#[test]
fn mount_compatible_precedence_between_tag_and_path() {
    // Both lines describe the same device; a path spec must return the
    // path line, a tag spec the tag line.
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("fstab"),
        "LABEL=foo /foo auto rw 0 0\n/dev/foo /foo auto rw 0 0\n",
    )
    .expect("parse");

    let by_path = tb.find_source("/dev/foo", Direction::Forward).expect("path");
    assert!(by_path.tag().is_none());
    let by_tag = tb.find_source("LABEL=foo", Direction::Forward).expect("tag");
    assert!(by_tag.tag().is_some());
}

#[test]
fn find_devno_matches_kernel_field() {
    let tb = mountinfo_table();
    let fs = tb
        .find_devno(Devno::new(0, 21), Direction::Backward)
        .expect("found");
    assert_eq!(fs.target(), Some("/home"));
    assert!(tb.find_devno(Devno::new(9, 9), Direction::Backward).is_none());
}

#[test]
fn find_pair_needs_both_to_match() {
    let tb = mountinfo_table();
    assert!(tb.find_pair("/dev/sda2", "/home", Direction::Backward).is_some());
    assert!(tb.find_pair("/dev/sda2", "/", Direction::Backward).is_none());
    assert!(tb.find_pair("/dev/sda1", "/home", Direction::Backward).is_none());
}

// ── Fs-root derivation ──────────────────────────────────────────────────────

#[test]
fn bind_mount_fs_root_strips_the_mountpoint() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 8:2 / /srcparent rw - ext4 /dev/sda2 rw
",
    )
    .expect("parse");

    let entry = fstab_entry("/srcparent/data /dst none bind 0 0");
    let (src_fs, root) = tb.fs_root(&entry, true).expect("fs-root");
    assert_eq!(root, "/data");
    assert_eq!(src_fs.expect("backing entry").source(), Some("/dev/sda2"));
}

#[test]
fn nested_bind_prepends_the_outer_root() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 8:12 /anydir /mnt/test rw - btrfs /dev/sdc rw
",
    )
    .expect("parse");

    // /mnt/test/foo sits on a mount whose fs-root is /anydir; the bind's
    // root must compose to /anydir/foo.
    let entry = fstab_entry("/mnt/test/foo /mnt/test2 auto bind 0 0");
    let (_, root) = tb.fs_root(&entry, true).expect("fs-root");
    assert_eq!(root, "/anydir/foo");
}

#[test]
fn btrfs_subvol_options_decide_the_root() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 0:38 /@home /home rw - btrfs /dev/sdc1 rw,subvolid=256,subvol=/@home
",
    )
    .expect("parse");

    // subvolid is resolved through the kernel-maintained subvol option of
    // the mounted entry.
    let entry = fstab_entry("/dev/sdc1 /home btrfs subvolid=256 0 0");
    let (none, root) = tb.fs_root(&entry, false).expect("fs-root");
    assert!(none.is_none());
    assert_eq!(root, "/@home");

    // An explicit subvol= is used directly (slash is prepended).
    let entry = fstab_entry("/dev/sdc1 /home btrfs subvol=@home 0 0");
    let (_, root) = tb.fs_root(&entry, false).expect("fs-root");
    assert_eq!(root, "/@home");

    // Neither option: the default-subvolume query is unavailable, so
    // derivation fails gracefully.
    let entry = fstab_entry("/dev/sdc1 /home btrfs defaults 0 0");
    assert!(tb.fs_root(&entry, false).is_none());
}

// ── Scenario: fstab is-mounted with bind ────────────────────────────────────

#[test]
fn bind_mount_is_detected_as_mounted() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 8:1 /src /dst rw - ext4 /dev/sda1 rw
",
    )
    .expect("parse");

    let entry = fstab_entry("/src /dst none bind 0 0");
    assert!(tb.is_fs_mounted(&entry));

    // Same source, different target: not mounted.
    let entry = fstab_entry("/src /elsewhere none bind 0 0");
    assert!(!tb.is_fs_mounted(&entry));

    // Different subtree of the source fs: not mounted.
    let entry = fstab_entry("/other /dst none bind 0 0");
    assert!(!tb.is_fs_mounted(&entry));
}

#[test]
fn plain_entries_and_swap_in_is_fs_mounted() {
    let tb = mountinfo_table();

    let entry = fstab_entry("/dev/sda2 /home ext4 rw 0 2");
    assert!(tb.is_fs_mounted(&entry));

    let entry = fstab_entry("/dev/sda2 /data ext4 rw 0 2");
    assert!(!tb.is_fs_mounted(&entry), "target differs");

    // Swap areas are always ignored.
    let entry = fstab_entry("/dev/sda3 none swap sw 0 0");
    assert!(!tb.is_fs_mounted(&entry));

    let entry = fstab_entry("/dev/sdz1 /home ext4 rw 0 2");
    assert!(!tb.is_fs_mounted(&entry), "unknown device");
}

#[test]
fn btrfs_without_subvol_degrades_to_not_mounted() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("mountinfo"),
        "\
20 1 8:1 / / rw - ext4 /dev/sda1 rw
21 20 0:38 /@ /data rw - btrfs /dev/sdc1 rw,subvolid=5,subvol=/@
",
    )
    .expect("parse");

    let entry = fstab_entry("/dev/sdc1 /data btrfs defaults 0 0");
    assert!(!tb.is_fs_mounted(&entry));
}

// ── Cache-assisted passes ───────────────────────────────────────────────────

#[test]
fn canonical_target_pass_uses_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let real = dir.path().join("real");
    std::fs::create_dir(&real).expect("mkdir");
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&real, &link).expect("symlink");
    let real_cn = std::fs::canonicalize(&real).expect("canonical");

    // fstab names the symlink; the caller asks with the real path.
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("fstab"),
        &format!("/dev/sdb1 {} ext4 rw 0 0\n", link.display()),
    )
    .expect("parse");

    assert!(
        tb.find_target(&real_cn.to_string_lossy(), Direction::Forward)
            .is_none(),
        "without a cache only native comparison runs"
    );

    tb.set_cache(PathCache::new());
    let fs = tb
        .find_target(&real_cn.to_string_lossy(), Direction::Forward)
        .expect("found via canonicalization");
    assert_eq!(fs.source(), Some("/dev/sdb1"));
}

#[test]
fn srcpath_tag_evaluation_against_cached_device_tags() {
    let mut tb = Table::new();
    tb.parse_text(
        Path::new("fstab"),
        "UUID=feedface-0000-4000-8000-000000000001 /home ext4 rw 0 2\n",
    )
    .expect("parse");

    let cache = PathCache::new();
    // Pretend the device was probed already.
    cache.store_tags(
        "/dev/null",
        vec![(
            "UUID".to_owned(),
            "feedface-0000-4000-8000-000000000001".to_owned(),
        )],
    );
    tb.set_cache(cache);

    // /dev/null canonicalizes to itself; its (seeded) tags match the
    // table's tagged entry.
    let fs = tb
        .find_srcpath("/dev/null", Direction::Forward)
        .expect("matched through tag evaluation");
    assert_eq!(fs.target(), Some("/home"));
}

// ── Entry sharing ───────────────────────────────────────────────────────────

#[test]
fn entries_can_be_shared_between_tables() {
    let fs = Arc::new({
        let mut fs = FsEntry::new();
        fs.set_source("/dev/sda1");
        fs.set_target("/");
        fs.set_fstype("ext4");
        fs
    });

    let mut a = Table::new();
    let mut b = Table::new();
    a.add(Arc::clone(&fs));
    b.add(Arc::clone(&fs));
    assert_eq!(a.nents(), 1);
    assert_eq!(b.nents(), 1);
    assert_eq!(Arc::strong_count(&fs), 3);

    a.remove(&fs);
    assert_eq!(a.nents(), 0);
    assert_eq!(b.nents(), 1);
    assert_eq!(Arc::strong_count(&fs), 2);
}
