//! Linux swap-area recognizer.
//!
//! The magic sits 10 bytes before the end of the first page, so one pattern
//! per plausible page size. mkswap zeroes the rest of the first page, which
//! is recorded as a wipe area.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::read_fixed;

const MAGIC_LEN: u64 = 10;
// Header fields after the 1024-byte boot block.
const VERSION_OFFSET: u64 = 1024;
const UUID_OFFSET: usize = 12;
const LABEL_OFFSET: usize = 28;

pub(super) static SWAP: IdInfo = IdInfo {
    name: "swap",
    usage: Usage::Other,
    tolerant: false,
    minsz: Some(10 * 4096),
    magics: &[
        // "SWAPSPACE2" (v1) and "SWAP-SPACE" (v0) for 4K/8K/16K/64K pages.
        IdMag { magic: b"SWAPSPACE2", kboff: 3, sboff: 1014 },
        IdMag { magic: b"SWAP-SPACE", kboff: 3, sboff: 1014 },
        IdMag { magic: b"SWAPSPACE2", kboff: 7, sboff: 1014 },
        IdMag { magic: b"SWAP-SPACE", kboff: 7, sboff: 1014 },
        IdMag { magic: b"SWAPSPACE2", kboff: 15, sboff: 1014 },
        IdMag { magic: b"SWAP-SPACE", kboff: 15, sboff: 1014 },
        IdMag { magic: b"SWAPSPACE2", kboff: 63, sboff: 1014 },
        IdMag { magic: b"SWAP-SPACE", kboff: 63, sboff: 1014 },
    ],
    probe_fn: probe_swap,
};

fn probe_swap(pr: &mut Prober, mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(mag) = mag else {
        return Ok(ProbeOutcome::Done);
    };
    let page_size = mag.offset + MAGIC_LEN;

    if mag.magic == b"SWAPSPACE2" {
        // Version-1 header follows the historical boot block.
        let Some(header) = pr.get_buffer(VERSION_OFFSET, 128)? else {
            return Ok(ProbeOutcome::Done);
        };
        if let Ok(uuid) = read_fixed::<16>(&header, UUID_OFFSET) {
            pr.set_uuid(&uuid);
        }
        pr.set_label_from(&header[LABEL_OFFSET..LABEL_OFFSET + 16]);
        pr.set_version_str("1");
    } else {
        pr.set_version_str("0");
    }

    pr.set_wiper(0, page_size);
    Ok(ProbeOutcome::Found)
}
