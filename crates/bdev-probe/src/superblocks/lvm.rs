//! LVM2 physical-volume recognizer.
//!
//! The label header ("LABELONE" … "LVM2 001") may sit in any of the first
//! four 512-byte sectors. pvcreate zeroes the first 8 KiB of the device,
//! which is recorded as a wipe area for the partition-collision policy.

use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;

const LABEL_ID: &[u8] = b"LABELONE";
const TYPE_OFFSET: u64 = 0x18;
const PV_UUID_LEN: usize = 32;
const WIPE_SIZE: u64 = 8 * 1024;

pub(super) static LVM2: IdInfo = IdInfo {
    name: "lvm2_member",
    usage: Usage::Raid,
    tolerant: false,
    minsz: None,
    magics: &[
        IdMag { magic: b"LVM2 001", kboff: 0, sboff: 0x018 },
        IdMag { magic: b"LVM2 001", kboff: 0, sboff: 0x218 },
        IdMag { magic: b"LVM2 001", kboff: 1, sboff: 0x018 },
        IdMag { magic: b"LVM2 001", kboff: 1, sboff: 0x218 },
    ],
    probe_fn: probe_lvm2,
};

/// Insert the dashes of the LVM textual UUID form (6-4-4-4-4-4-6).
fn format_lvm_uuid(raw: &[u8]) -> Option<String> {
    if raw.len() != PV_UUID_LEN || !raw.iter().all(u8::is_ascii_alphanumeric) {
        return None;
    }
    let s = std::str::from_utf8(raw).ok()?;
    let groups = [6_usize, 4, 4, 4, 4, 4, 6];
    let mut out = String::with_capacity(PV_UUID_LEN + groups.len() - 1);
    let mut pos = 0;
    for (i, len) in groups.into_iter().enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.push_str(&s[pos..pos + len]);
        pos += len;
    }
    Some(out)
}

fn probe_lvm2(pr: &mut Prober, mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(mag) = mag else {
        return Ok(ProbeOutcome::Done);
    };
    let sector_off = mag.offset - TYPE_OFFSET;

    let Some(sector) = pr.get_buffer(sector_off, 512)? else {
        return Ok(ProbeOutcome::Done);
    };
    if !sector.starts_with(LABEL_ID) {
        return Ok(ProbeOutcome::Done);
    }

    // pv_header directly follows the 32-byte label header.
    if let Some(uuid) = format_lvm_uuid(&sector[32..32 + PV_UUID_LEN]) {
        pr.set_uuid_str(&uuid);
    }

    pr.set_wiper(0, WIPE_SIZE);
    Ok(ProbeOutcome::Found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lvm_uuid_dash_groups() {
        let raw = b"AbcDef1234GHij5678KLmn9012OPqr34";
        assert_eq!(
            format_lvm_uuid(raw).expect("uuid"),
            "AbcDef-1234-GHij-5678-KLmn-9012-OPqr34"
        );
        assert!(format_lvm_uuid(b"short").is_none());
        assert!(format_lvm_uuid(&[b'!'; 32]).is_none());
    }
}
