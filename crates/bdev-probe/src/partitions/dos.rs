//! DOS (MBR) partition-table recognizer.

use super::{PartEntry, PartTable};
use crate::chain::{IdInfo, Usage};
use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use bdev_types::read_le_u32;

const ENTRIES_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const DISK_ID_OFFSET: usize = 0x1B8;
const GPT_PROTECTIVE_TYPE: u8 = 0xEE;

pub(crate) static DOS: IdInfo = IdInfo {
    name: "dos",
    usage: Usage::Other,
    tolerant: false,
    minsz: None,
    magics: &[IdMag {
        magic: &[0x55, 0xAA],
        kboff: 0,
        sboff: 510,
    }],
    probe_fn: probe_dos,
};

fn probe_dos(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let Some(sector) = pr.get_buffer(0, 512)? else {
        return Ok(ProbeOutcome::Done);
    };
    let Some(table) = parse_table(&sector) else {
        return Ok(ProbeOutcome::Done);
    };

    if let Some(id) = &table.id {
        pr.set_value_str("PTUUID", id);
    }
    Ok(ProbeOutcome::Found)
}

/// Heuristic: the 0x55AA signature is shared with FAT boot sectors. A
/// sector that decodes as a FAT BPB is not a partition table.
fn looks_like_fat(sector: &[u8]) -> bool {
    sector[54..62] == *b"FAT12   "
        || sector[54..62] == *b"FAT16   "
        || sector[82..90] == *b"FAT32   "
        || sector[3..8] == *b"MSDOS"
        || sector[3..10] == *b"mkdosfs"
        || sector[3..11] == *b"mkfs.fat"
}

/// Parse an MBR sector. Returns `None` when the sector does not hold a DOS
/// partition table (bad signature, FAT boot sector, protective GPT MBR or
/// corrupt entries).
pub(crate) fn parse_table(sector: &[u8]) -> Option<PartTable> {
    if sector.len() < 512 || sector[510] != 0x55 || sector[511] != 0xAA {
        return None;
    }
    if looks_like_fat(sector) {
        return None;
    }

    let mut entries = Vec::new();
    for i in 0..4 {
        let raw = &sector[ENTRIES_OFFSET + i * ENTRY_SIZE..ENTRIES_OFFSET + (i + 1) * ENTRY_SIZE];
        let status = raw[0];
        if status != 0x00 && status != 0x80 {
            return None; // corrupt entry table
        }
        let ptype = raw[4];
        if ptype == GPT_PROTECTIVE_TYPE {
            return None; // protective MBR; the gpt recognizer owns this disk
        }
        let start = u64::from(read_le_u32(raw, 8).ok()?);
        let size = u64::from(read_le_u32(raw, 12).ok()?);
        if ptype == 0 || size == 0 {
            continue;
        }
        #[expect(clippy::cast_possible_truncation)] // i < 4
        entries.push(PartEntry {
            number: i as u32 + 1,
            start,
            size,
            type_str: format!("0x{ptype:x}"),
            uuid: None,
            name: None,
        });
    }

    let disk_id = read_le_u32(sector, DISK_ID_OFFSET).unwrap_or(0);
    Some(PartTable {
        scheme: "dos",
        id: (disk_id != 0).then(|| format!("{disk_id:08x}")),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mbr_with_entry(ptype: u8, start: u32, size: u32) -> Vec<u8> {
        let mut sector = vec![0_u8; 512];
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector[DISK_ID_OFFSET..DISK_ID_OFFSET + 4].copy_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
        let e = &mut sector[ENTRIES_OFFSET..ENTRIES_OFFSET + ENTRY_SIZE];
        e[0] = 0x80;
        e[4] = ptype;
        e[8..12].copy_from_slice(&start.to_le_bytes());
        e[12..16].copy_from_slice(&size.to_le_bytes());
        sector
    }

    #[test]
    fn parses_a_single_linux_partition() {
        let table = parse_table(&mbr_with_entry(0x83, 2048, 20480)).expect("table");
        assert_eq!(table.scheme, "dos");
        assert_eq!(table.id.as_deref(), Some("deadbeef"));
        assert_eq!(table.entries.len(), 1);
        let e = &table.entries[0];
        assert_eq!((e.number, e.start, e.size), (1, 2048, 20480));
        assert_eq!(e.type_str, "0x83");
    }

    #[test]
    fn rejects_bad_signature_and_fat() {
        let mut sector = mbr_with_entry(0x83, 2048, 20480);
        sector[511] = 0;
        assert!(parse_table(&sector).is_none());

        let mut fat = mbr_with_entry(0x83, 2048, 20480);
        fat[54..62].copy_from_slice(b"FAT16   ");
        assert!(parse_table(&fat).is_none());
    }

    #[test]
    fn rejects_protective_mbr() {
        assert!(parse_table(&mbr_with_entry(GPT_PROTECTIVE_TYPE, 1, 0xFFFF_FFFF)).is_none());
    }

    #[test]
    fn rejects_corrupt_status_bytes() {
        let mut sector = mbr_with_entry(0x83, 2048, 20480);
        sector[ENTRIES_OFFSET] = 0x42;
        assert!(parse_table(&sector).is_none());
    }

    #[test]
    fn empty_table_is_still_a_table() {
        let mut sector = vec![0_u8; 512];
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let table = parse_table(&sector).expect("empty table");
        assert!(table.entries.is_empty());
        assert!(table.id.is_none());
    }
}
