//! GPT partition-table recognizer.
//!
//! GPT has no fixed-offset magic usable by the generic matcher (the header
//! sits at LBA 1, which depends on the sector size), so the descriptor
//! declares no magics and the probe callback does the checking, including
//! the protective-MBR requirement and the header CRC.

use super::{PartEntry, PartTable};
use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::{crc32_ieee, read_le_u32, read_le_u64, uuid_is_empty};
use tracing::debug;

const HEADER_SIG: &[u8] = b"EFI PART";
const MIN_HEADER_SIZE: usize = 92;
const MAX_ENTRIES: u32 = 128;
const EMPTY: [IdMag; 0] = [];

pub(crate) static GPT: IdInfo = IdInfo {
    name: "gpt",
    usage: Usage::Other,
    tolerant: false,
    minsz: None,
    magics: &EMPTY,
    probe_fn: probe_gpt,
};

fn probe_gpt(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let ssz = u64::from(pr.sector_size());
    let Some(table) = parse_table(pr)? else {
        return Ok(ProbeOutcome::Done);
    };

    if let Some(id) = &table.id {
        pr.set_value_str("PTUUID", id);
    }
    pr.set_magic(ssz, HEADER_SIG);
    Ok(ProbeOutcome::Found)
}

/// Format a GPT GUID: the first three fields are little-endian on disk.
fn format_guid(g: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        g[3], g[2], g[1], g[0],
        g[5], g[4],
        g[7], g[6],
        g[8], g[9],
        g[10], g[11], g[12], g[13], g[14], g[15]
    )
}

fn decode_utf16le_name(raw: &[u8]) -> Option<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    if units.is_empty() {
        return None;
    }
    Some(String::from_utf16_lossy(&units))
}

/// A GPT disk must carry a protective (or hybrid) MBR with a 0xEE entry.
fn has_protective_mbr(sector0: &[u8]) -> bool {
    if sector0.len() < 512 || sector0[510] != 0x55 || sector0[511] != 0xAA {
        return false;
    }
    (0..4).any(|i| sector0[446 + i * 16 + 4] == 0xEE)
}

/// Parse the GPT header and entry array. Returns `None` when the device
/// does not carry a valid GPT (bad signature, bad CRC, no protective MBR).
pub(crate) fn parse_table(pr: &mut Prober) -> Result<Option<PartTable>> {
    let ssz = u64::from(pr.sector_size());

    let Some(sector0) = pr.get_buffer(0, 512)? else {
        return Ok(None);
    };
    if !has_protective_mbr(&sector0) {
        return Ok(None);
    }

    let Some(header) = pr.get_buffer(ssz, 512)? else {
        return Ok(None);
    };
    if !header.starts_with(HEADER_SIG) {
        return Ok(None);
    }

    let header_size = read_le_u32(&header, 12).unwrap_or(0) as usize;
    if !(MIN_HEADER_SIZE..=512).contains(&header_size) {
        return Ok(None);
    }
    let stored_crc = read_le_u32(&header, 16).unwrap_or(0);
    let mut scratch = header[..header_size].to_vec();
    scratch[16..20].fill(0);
    if crc32_ieee(&scratch) != stored_crc {
        debug!(target: "bdev::probe::partitions", "gpt header crc mismatch");
        return Ok(None);
    }

    let disk_guid: [u8; 16] = header[56..72].try_into().expect("fixed slice");
    let entries_lba = read_le_u64(&header, 72).unwrap_or(0);
    let num_entries = read_le_u32(&header, 80).unwrap_or(0).min(MAX_ENTRIES);
    let entry_size = read_le_u32(&header, 84).unwrap_or(0) as usize;
    if entries_lba == 0 || entry_size < 128 || entry_size > 4096 {
        return Ok(None);
    }

    let mut entries = Vec::new();
    let array = if num_entries == 0 {
        Vec::new()
    } else {
        let array_len = u64::from(num_entries) * entry_size as u64;
        match pr.get_buffer(entries_lba * ssz, array_len)? {
            Some(array) => array,
            None => return Ok(None),
        }
    };
    for i in 0..num_entries as usize {
        let raw = &array[i * entry_size..(i + 1) * entry_size];
        let type_guid: [u8; 16] = raw[0..16].try_into().expect("fixed slice");
        if uuid_is_empty(&type_guid) {
            continue;
        }
        let unique_guid: [u8; 16] = raw[16..32].try_into().expect("fixed slice");
        let first_lba = read_le_u64(raw, 32).unwrap_or(0);
        let last_lba = read_le_u64(raw, 40).unwrap_or(0);
        if last_lba < first_lba {
            continue;
        }
        #[expect(clippy::cast_possible_truncation)] // bounded by MAX_ENTRIES
        entries.push(PartEntry {
            number: i as u32 + 1,
            start: first_lba,
            size: last_lba - first_lba + 1,
            type_str: format_guid(&type_guid),
            uuid: Some(format_guid(&unique_guid)),
            name: decode_utf16le_name(&raw[56..]),
        });
    }

    Ok(Some(PartTable {
        scheme: "gpt",
        id: Some(format_guid(&disk_guid)),
        entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_mixed_endian_format() {
        let g = [
            0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E,
            0xC9, 0x3B,
        ];
        // EFI system partition type GUID.
        assert_eq!(format_guid(&g), "c12a7328-f81f-11d2-ba4b-00a0c93ec93b");
    }

    #[test]
    fn utf16_names_stop_at_nul() {
        let mut raw = [0_u8; 72];
        for (i, b) in "boot".bytes().enumerate() {
            raw[i * 2] = b;
        }
        assert_eq!(decode_utf16le_name(&raw).as_deref(), Some("boot"));
        assert!(decode_utf16le_name(&[0_u8; 8]).is_none());
    }
}
