//! Sysfs lookups keyed by device number.
//!
//! Everything here degrades to `None` when the attribute is missing, the
//! device is gone, or we are not on a sysfs-bearing system (test images are
//! regular files with no devno at all).

use bdev_types::Devno;
use std::path::PathBuf;

fn sysfs_dir(devno: Devno) -> PathBuf {
    PathBuf::from(format!("/sys/dev/block/{devno}"))
}

fn read_attr(devno: Devno, name: &str) -> Option<String> {
    let text = std::fs::read_to_string(sysfs_dir(devno).join(name)).ok()?;
    Some(text.trim().to_owned())
}

pub(crate) fn read_u64_attr(devno: Devno, name: &str) -> Option<u64> {
    read_attr(devno, name)?.parse().ok()
}

/// True when the devno names a partition rather than a whole disk.
pub(crate) fn is_partition(devno: Devno) -> bool {
    sysfs_dir(devno).join("partition").exists()
}

/// Partition number within the owning disk.
pub(crate) fn partno(devno: Devno) -> Option<u32> {
    read_attr(devno, "partition")?.parse().ok()
}

/// Devno of the whole disk owning this device (identity for whole disks).
pub(crate) fn wholedisk_devno(devno: Devno) -> Option<Devno> {
    if !is_partition(devno) {
        return Some(devno);
    }
    // /sys/dev/block/<maj>:<min> is a symlink into the disk's directory;
    // the parent holds the disk's `dev` attribute.
    let part_dir = sysfs_dir(devno).canonicalize().ok()?;
    let disk_dev = std::fs::read_to_string(part_dir.parent()?.join("dev")).ok()?;
    Devno::parse(disk_dev.trim()).ok()
}

/// Resolve a devno to its /dev node path via the sysfs directory name.
pub(crate) fn devno_to_devname(devno: Devno) -> Option<PathBuf> {
    let dir = sysfs_dir(devno).canonicalize().ok()?;
    let name = dir.file_name()?;
    let path = PathBuf::from("/dev").join(name);
    path.exists().then_some(path)
}

/// Queue attribute of the owning disk (partitions have no queue directory).
pub(crate) fn queue_attr(devno: Devno, name: &str) -> Option<u64> {
    let disk = wholedisk_devno(devno)?;
    read_u64_attr(disk, &format!("queue/{name}"))
}

/// True for device-mapper volumes LVM marks as private (snapshot cow,
/// pmspare and the like); these must never be scanned for signatures.
pub(crate) fn devno_is_lvm_private(devno: Devno) -> bool {
    let Some(uuid) = read_attr(devno, "dm/uuid") else {
        return false;
    };
    uuid.starts_with("LVM-")
        && uuid
            .rsplit_once('-')
            .is_some_and(|(_, suffix)| suffix == "private")
}

/// True for CD/DVD drives (SCSI type 5), which misbehave when probed for
/// RAID signatures near the last sector.
pub(crate) fn devno_is_cdrom(devno: Devno) -> bool {
    read_attr(devno, "device/type").is_some_and(|t| t == "5")
}
