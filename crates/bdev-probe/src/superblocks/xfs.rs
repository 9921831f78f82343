//! XFS superblock recognizer. All on-disk fields are big-endian.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{ensure_slice, read_fixed};

pub(super) static XFS: IdInfo = IdInfo {
    name: "xfs",
    usage: Usage::Filesystem,
    tolerant: false,
    minsz: None,
    magics: &[IdMag {
        magic: b"XFSB",
        kboff: 0,
        sboff: 0,
    }],
    probe_fn: probe_xfs,
};

fn read_be_u16(data: &[u8], offset: usize) -> Option<u16> {
    let b = ensure_slice(data, offset, 2).ok()?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let b = ensure_slice(data, offset, 4).ok()?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_be_u64(data: &[u8], offset: usize) -> Option<u64> {
    let b = ensure_slice(data, offset, 8).ok()?;
    Some(u64::from_be_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

fn probe_xfs(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(sb) = pr.get_buffer(0, 512)? else {
        return Ok(ProbeOutcome::Done);
    };

    let block_size = read_be_u32(&sb, 4).unwrap_or(0);
    if !block_size.is_power_of_two() || !(512..=65536).contains(&block_size) {
        return Ok(ProbeOutcome::Done);
    }
    let dblocks = read_be_u64(&sb, 8).unwrap_or(0);
    if dblocks == 0 {
        return Ok(ProbeOutcome::Done);
    }
    let sect_size = read_be_u16(&sb, 102).unwrap_or(0);
    if !sect_size.is_power_of_two() || !(512..=32768).contains(&sect_size) {
        return Ok(ProbeOutcome::Done);
    }

    if let Ok(uuid) = read_fixed::<16>(&sb, 32) {
        pr.set_uuid(&uuid);
    }
    pr.set_label_from(&sb[108..120]);

    let version = read_be_u16(&sb, 100).unwrap_or(0) & 0x000F;
    pr.set_version_str(&version.to_string());

    Ok(ProbeOutcome::Found)
}
