//! ISO9660 recognizer. Tolerant: hybrid images legitimately carry an ISO
//! filesystem next to a partition table or another filesystem.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::trim_nul_padded;

const PVD_OFFSET: u64 = 32 * 1024; // sector 16 of 2048
const VOLUME_ID_OFFSET: usize = 40;
const VOLUME_ID_LEN: usize = 32;

pub(super) static ISO9660: IdInfo = IdInfo {
    name: "iso9660",
    usage: Usage::Filesystem,
    tolerant: true,
    minsz: None,
    magics: &[IdMag {
        magic: b"CD001",
        kboff: 32,
        sboff: 1,
    }],
    probe_fn: probe_iso9660,
};

fn probe_iso9660(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(pvd) = pr.get_buffer(PVD_OFFSET, 2048)? else {
        return Ok(ProbeOutcome::Done);
    };

    if pvd[0] != 1 {
        return Ok(ProbeOutcome::Done); // not a primary volume descriptor
    }

    let label = trim_nul_padded(&pvd[VOLUME_ID_OFFSET..VOLUME_ID_OFFSET + VOLUME_ID_LEN]);
    if !label.is_empty() {
        pr.set_label_str(&label);
    }

    Ok(ProbeOutcome::Found)
}
