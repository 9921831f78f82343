//! Linux MD RAID member recognizer (v1.2 metadata: superblock at 4 KiB).

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{read_fixed, read_le_u32};

const SB_OFFSET: u64 = 4096;

pub(super) static LINUX_RAID: IdInfo = IdInfo {
    name: "linux_raid_member",
    usage: Usage::Raid,
    tolerant: false,
    minsz: Some(64 * 1024),
    magics: &[IdMag {
        // MD_SB_MAGIC 0xa92b4efc, little-endian on disk.
        magic: &[0xFC, 0x4E, 0x2B, 0xA9],
        kboff: 4,
        sboff: 0,
    }],
    probe_fn: probe_linux_raid,
};

fn probe_linux_raid(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(sb) = pr.get_buffer(SB_OFFSET, 256)? else {
        return Ok(ProbeOutcome::Done);
    };

    if read_le_u32(&sb, 4).unwrap_or(0) != 1 {
        return Ok(ProbeOutcome::Done); // major_version must be 1
    }

    if let Ok(uuid) = read_fixed::<16>(&sb, 16) {
        pr.set_uuid(&uuid);
    }
    pr.set_label_from(&sb[32..64]); // set_name
    pr.set_version_str("1.2");

    Ok(ProbeOutcome::Found)
}
