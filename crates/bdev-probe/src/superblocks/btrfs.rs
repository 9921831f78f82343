//! btrfs superblock recognizer. The primary superblock is at 64 KiB; its
//! first 32 bytes hold the checksum of the rest of the 4 KiB block.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{crc32c, read_fixed, read_le_u16, read_le_u32};

const SB_OFFSET: u64 = 64 * 1024;
const SB_SIZE: u64 = 4096;
const LABEL_OFFSET: usize = 0x12B;
const LABEL_LEN: usize = 256;
const CSUM_TYPE_CRC32C: u16 = 0;

pub(super) static BTRFS: IdInfo = IdInfo {
    name: "btrfs",
    usage: Usage::Filesystem,
    tolerant: false,
    minsz: Some(1024 * 1024),
    magics: &[IdMag {
        magic: b"_BHRfS_M",
        kboff: 64,
        sboff: 0x40,
    }],
    probe_fn: probe_btrfs,
};

fn probe_btrfs(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(sb) = pr.get_buffer(SB_OFFSET, SB_SIZE)? else {
        return Ok(ProbeOutcome::Done);
    };

    let sectorsize = read_le_u32(&sb, 0x90).unwrap_or(0);
    if !sectorsize.is_power_of_two() || !(512..=65536).contains(&sectorsize) {
        return Ok(ProbeOutcome::Done);
    }

    let csum_type = read_le_u16(&sb, 0xC4).unwrap_or(u16::MAX);
    if csum_type == CSUM_TYPE_CRC32C {
        let expected = read_le_u32(&sb, 0).unwrap_or(0);
        let computed = crc32c(&sb[0x20..]);
        if !pr.verify_csum(u64::from(computed), u64::from(expected)) {
            return Ok(ProbeOutcome::Done);
        }
    }

    if let Ok(fsid) = read_fixed::<16>(&sb, 0x20) {
        pr.set_uuid(&fsid);
    }
    pr.set_label_from(&sb[LABEL_OFFSET..LABEL_OFFSET + LABEL_LEN]);

    Ok(ProbeOutcome::Found)
}
