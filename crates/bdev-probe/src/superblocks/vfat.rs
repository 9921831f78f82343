//! FAT12/16/32 recognizer.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{read_le_u16, read_le_u32, trim_nul_padded};

pub(super) static VFAT: IdInfo = IdInfo {
    name: "vfat",
    usage: Usage::Filesystem,
    tolerant: false,
    minsz: None,
    magics: &[
        IdMag {
            magic: b"FAT32   ",
            kboff: 0,
            sboff: 0x52,
        },
        IdMag {
            magic: b"FAT16   ",
            kboff: 0,
            sboff: 0x36,
        },
        IdMag {
            magic: b"FAT12   ",
            kboff: 0,
            sboff: 0x36,
        },
        IdMag {
            magic: b"MSDOS",
            kboff: 0,
            sboff: 0x36,
        },
        IdMag {
            magic: b"mkdosfs",
            kboff: 0,
            sboff: 0x03,
        },
        IdMag {
            magic: b"mkfs.fat",
            kboff: 0,
            sboff: 0x03,
        },
    ],
    probe_fn: probe_vfat,
};

fn probe_vfat(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(bs) = pr.get_buffer(0, 512)? else {
        return Ok(ProbeOutcome::Done);
    };

    // BPB sanity.
    let bytes_per_sector = read_le_u16(&bs, 11).unwrap_or(0);
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        return Ok(ProbeOutcome::Done);
    }
    let sectors_per_cluster = bs[13];
    if !sectors_per_cluster.is_power_of_two() {
        return Ok(ProbeOutcome::Done);
    }
    if read_le_u16(&bs, 14).unwrap_or(0) == 0 {
        return Ok(ProbeOutcome::Done); // reserved sector count
    }
    let fats = bs[16];
    if fats == 0 || fats > 4 {
        return Ok(ProbeOutcome::Done);
    }

    // root_entries == 0 distinguishes FAT32 from FAT12/16; for the latter
    // two the cluster count decides (FAT12 has fewer than 4085 clusters).
    let root_entries = read_le_u16(&bs, 17).unwrap_or(0);
    let (version, label_off, serial_off) = if root_entries == 0 {
        ("FAT32", 71, 67)
    } else {
        let reserved = u32::from(read_le_u16(&bs, 14).unwrap_or(0));
        let fat_size = u32::from(read_le_u16(&bs, 22).unwrap_or(0));
        let total16 = read_le_u16(&bs, 19).unwrap_or(0);
        let total = if total16 != 0 {
            u32::from(total16)
        } else {
            read_le_u32(&bs, 32).unwrap_or(0)
        };
        let bps = u32::from(bytes_per_sector);
        let root_dir_sectors = (u32::from(root_entries) * 32).div_ceil(bps);
        let meta_sectors = reserved + u32::from(fats) * fat_size + root_dir_sectors;
        if total <= meta_sectors {
            return Ok(ProbeOutcome::Done);
        }
        let clusters = (total - meta_sectors) / u32::from(sectors_per_cluster);
        let version = if clusters < 4085 { "FAT12" } else { "FAT16" };
        (version, 43, 39)
    };

    let label = trim_nul_padded(&bs[label_off..label_off + 11]);
    if !label.is_empty() && label != "NO NAME" {
        pr.set_label_str(&label);
    }

    let serial = read_le_u32(&bs, serial_off).unwrap_or(0);
    if serial != 0 {
        pr.set_uuid_str(&format!("{:04X}-{:04X}", serial >> 16, serial & 0xFFFF));
    }

    pr.set_version_str(version);
    pr.set_sectype("msdos");

    Ok(ProbeOutcome::Found)
}
