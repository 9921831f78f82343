//! Magic-pattern matching.
//!
//! A magic pattern is a byte string at a kibibyte offset plus a
//! sector-relative offset. The engine probes by reading 1024 bytes at
//! `(kboff + sboff/1024) KiB` and comparing at `sboff % 1024` within that
//! window.

use crate::Prober;
use crate::chain::IdInfo;
use bdev_error::Result;
use tracing::trace;

/// One magic pattern of a descriptor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdMag {
    pub magic: &'static [u8],
    /// Kibibyte offset of the window holding the magic.
    pub kboff: u64,
    /// Sector-relative byte offset within that window (may exceed 1024).
    pub sboff: u16,
}

/// A successful magic match.
#[derive(Debug, Clone)]
pub struct MagicHit {
    /// Effective byte offset of the magic on the device (window-relative).
    pub offset: u64,
    pub magic: &'static [u8],
}

/// Outcome of checking a descriptor's magic list.
pub(crate) enum MagicCheck {
    /// A magic matched at the recorded offset.
    Hit(MagicHit),
    /// The descriptor declares no magics; the probe callback decides alone.
    NoMagics,
    /// Magics are declared but none matched.
    Miss,
}

/// Check every magic pattern of `id` in order.
pub(crate) fn match_magics(pr: &mut Prober, id: &IdInfo) -> Result<MagicCheck> {
    if id.magics.is_empty() {
        return Ok(MagicCheck::NoMagics);
    }

    for mag in id.magics {
        let slot_off = (mag.kboff + u64::from(mag.sboff >> 10)) << 10;
        let Some(buf) = pr.get_buffer(slot_off, 1024)? else {
            continue; // window too small for this magic
        };
        let in_slot = usize::from(mag.sboff & 0x3FF);
        if buf[in_slot..].starts_with(mag.magic) {
            trace!(
                target: "bdev::probe::magic",
                name = id.name,
                kboff = mag.kboff,
                sboff = mag.sboff,
                "magic match"
            );
            return Ok(MagicCheck::Hit(MagicHit {
                offset: slot_off + in_slot as u64,
                magic: mag.magic,
            }));
        }
    }

    Ok(MagicCheck::Miss)
}
