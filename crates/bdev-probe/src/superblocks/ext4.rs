//! ext4 superblock recognizer.
//!
//! The superblock lives at byte 1024; its magic `0x53EF` sits at +0x38,
//! so the effective magic offset on the device is 1080.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{crc32c, read_fixed, read_le_u16, read_le_u32};

const SB_OFFSET: u64 = 1024;
const SB_SIZE: u64 = 1024;

const FEATURE_RO_COMPAT_METADATA_CSUM: u32 = 0x0400;
const CHECKSUM_OFFSET: usize = 0x3FC;

pub(super) static EXT4: IdInfo = IdInfo {
    name: "ext4",
    usage: Usage::Filesystem,
    tolerant: false,
    minsz: None,
    magics: &[IdMag {
        magic: &[0x53, 0xEF],
        kboff: 1,
        sboff: 0x38,
    }],
    probe_fn: probe_ext4,
};

fn probe_ext4(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(sb) = pr.get_buffer(SB_OFFSET, SB_SIZE)? else {
        return Ok(ProbeOutcome::Done);
    };

    let inodes_count = read_le_u32(&sb, 0x00).unwrap_or(0);
    let blocks_count = read_le_u32(&sb, 0x04).unwrap_or(0);
    if inodes_count == 0 || blocks_count == 0 {
        return Ok(ProbeOutcome::Done);
    }

    let ro_compat = read_le_u32(&sb, 0x64).unwrap_or(0);
    if ro_compat & FEATURE_RO_COMPAT_METADATA_CSUM != 0 {
        let expected = read_le_u32(&sb, CHECKSUM_OFFSET).unwrap_or(0);
        let computed = crc32c(&sb[..CHECKSUM_OFFSET]);
        if !pr.verify_csum(u64::from(computed), u64::from(expected)) {
            return Ok(ProbeOutcome::Done);
        }
    }

    if let Ok(uuid) = read_fixed::<16>(&sb, 0x68) {
        pr.set_uuid(&uuid);
    }
    pr.set_label_from(&sb[0x78..0x88]);

    let rev = read_le_u32(&sb, 0x4C).unwrap_or(0);
    let minor = read_le_u16(&sb, 0x3E).unwrap_or(0);
    pr.set_version_str(&format!("{rev}.{minor}"));

    Ok(ProbeOutcome::Found)
}
