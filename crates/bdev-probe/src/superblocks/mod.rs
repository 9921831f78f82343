//! The superblocks chain: filesystem, RAID and volume-manager signatures.
//!
//! Descriptors are probed in array order; RAID-class signatures come first
//! so a safeprobe can stop early once a RAID member is recognized.

mod btrfs;
mod ext4;
mod iso9660;
mod linux_raid;
mod lvm;
mod swap;
mod vfat;
mod xfs;

use crate::chain::{ChainDriver, ChainId, IdInfo, Usage};
use crate::magic::{MagicCheck, match_magics};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use tracing::debug;

/// Result flags of the superblocks chain.
pub mod sb_flags {
    pub const LABEL: u32 = 1 << 1;
    pub const UUID: u32 = 1 << 2;
    pub const TYPE: u32 = 1 << 3;
    pub const SECTYPE: u32 = 1 << 4;
    pub const USAGE: u32 = 1 << 5;
    pub const VERSION: u32 = 1 << 6;
    pub const MAGIC: u32 = 1 << 7;
    /// Accept signatures with a broken checksum, reporting `SBBADCSUM=1`.
    pub const BADCSUM: u32 = 1 << 8;

    pub const DEFAULT: u32 = LABEL | UUID | TYPE | SECTYPE;
}

/// Signature catalogue, in probing order.
static IDINFOS: [&IdInfo; 8] = [
    &linux_raid::LINUX_RAID,
    &lvm::LVM2,
    &swap::SWAP,
    &ext4::EXT4,
    &xfs::XFS,
    &btrfs::BTRFS,
    &vfat::VFAT,
    &iso9660::ISO9660,
];

pub(crate) struct SuperblocksChain;

impl SuperblocksChain {
    /// One probing step shared by `probe` and `safeprobe`.
    fn probe_step(pr: &mut Prober) -> Result<ProbeOutcome> {
        let ci = ChainId::Superblocks;
        pr.values_mut().reset_chain(ci);
        if pr.noscan() {
            return Ok(ProbeOutcome::Done);
        }

        let start = pr.chain_state(ci).idx.map_or(0, |i| i + 1);
        for i in start..IDINFOS.len() {
            pr.chain_state_mut(ci).idx = Some(i);
            if pr.chain_state(ci).is_filtered(i) {
                continue;
            }

            let id = IDINFOS[i];
            // RAID probing is skipped on tiny devices and CD drives (the
            // last-sector reads upset some drives).
            if id.usage == Usage::Raid && (pr.is_tiny() || pr.is_cdrom()) {
                continue;
            }
            if id.minsz.is_some_and(|min| min > pr.size()) {
                continue;
            }

            let hit = match match_magics(pr, id)? {
                MagicCheck::Miss => continue,
                MagicCheck::Hit(hit) => Some(hit),
                MagicCheck::NoMagics => None,
            };

            debug!(
                target: "bdev::probe::superblocks",
                name = id.name,
                idx = i,
                "calling probe function"
            );
            pr.values_mut().reset_chain(ci);
            match (id.probe_fn)(pr, hit.as_ref())? {
                ProbeOutcome::Done => {
                    pr.values_mut().reset_chain(ci);
                    continue;
                }
                ProbeOutcome::Found => {}
            }

            let flags = pr.chain_state(ci).flags;
            if flags & sb_flags::TYPE != 0 && pr.lookup_value("TYPE").is_none() {
                pr.set_value_str("TYPE", id.name);
            }
            if flags & sb_flags::USAGE != 0 {
                pr.set_value_str("USAGE", id.usage.as_str());
            }
            if let Some(hit) = &hit {
                pr.set_magic(hit.offset, hit.magic);
            }
            return Ok(ProbeOutcome::Found);
        }

        Ok(ProbeOutcome::Done)
    }
}

impl ChainDriver for SuperblocksChain {
    fn id(&self) -> ChainId {
        ChainId::Superblocks
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn default_flags(&self) -> u32 {
        sb_flags::DEFAULT
    }

    fn supports_filter(&self) -> bool {
        true
    }

    fn idinfos(&self) -> &'static [&'static IdInfo] {
        &IDINFOS
    }

    fn probe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        Self::probe_step(pr)
    }

    /// Walk the whole chain. At most one intolerant signature may match;
    /// a second one is ambivalence. Once a RAID member is recognized no
    /// further filesystems are checked (the first RAID wins).
    fn safeprobe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        let ci = ChainId::Superblocks;
        let mut intolerant = 0_usize;
        let mut total = 0_usize;
        let mut saved = None;
        let mut saved_tolerant = None;

        pr.chain_state_mut(ci).reset_position();
        loop {
            match Self::probe_step(pr)? {
                ProbeOutcome::Done => break,
                ProbeOutcome::Found => {}
            }
            total += 1;
            let idx = pr.chain_state(ci).idx.expect("match sets idx");
            let id = IDINFOS[idx];

            if id.tolerant {
                if saved_tolerant.is_none() && intolerant == 0 {
                    saved_tolerant = Some(pr.values_mut().take_chain(ci));
                }
                continue;
            }

            intolerant += 1;
            if intolerant == 1 {
                saved = Some(pr.values_mut().take_chain(ci));
                if id.usage == Usage::Raid {
                    // RAID wins; don't look for filesystems on top of it.
                    break;
                }
            }
            if intolerant > 1 {
                break;
            }
        }

        if intolerant > 1 {
            debug!(target: "bdev::probe::superblocks", "ambivalent result, discarding values");
            pr.values_mut().reset_chain(ci);
            return Err(bdev_error::BdevError::Ambivalent);
        }
        if total == 0 {
            return Ok(ProbeOutcome::Done);
        }

        pr.values_mut().reset_chain(ci);
        if let Some(vals) = saved.or(saved_tolerant) {
            pr.values_mut().append(vals);
        }
        Ok(ProbeOutcome::Found)
    }
}
