//! The partitions chain: partition-table recognizers.
//!
//! GPT is probed before DOS so a protective MBR resolves to GPT. When the
//! probed device is itself a partition, the chain reports `PART_ENTRY_*`
//! details by parsing the owning disk's table through the whole-disk prober.

pub(crate) mod dos;
pub(crate) mod gpt;

use crate::chain::{ChainDriver, ChainId, IdInfo};
use crate::magic::{MagicCheck, match_magics};
use crate::{ProbeOutcome, Prober, sysfs};
use bdev_error::Result;
use tracing::debug;

/// Result flags of the partitions chain.
pub mod part_flags {
    /// Emit `PART_ENTRY_*` values when probing a partition device.
    pub const ENTRY_DETAILS: u32 = 1 << 1;
    pub const MAGIC: u32 = 1 << 2;

    pub const DEFAULT: u32 = 0;
}

/// An in-memory partition table parsed from a device.
#[derive(Debug, Clone)]
pub struct PartTable {
    /// Table scheme: `dos` or `gpt`.
    pub scheme: &'static str,
    /// Disk identifier (MBR id or GPT disk GUID).
    pub id: Option<String>,
    pub entries: Vec<PartEntry>,
}

/// One primary partition entry.
#[derive(Debug, Clone)]
pub struct PartEntry {
    /// 1-based partition number.
    pub number: u32,
    /// Start in 512-byte sectors.
    pub start: u64,
    /// Size in 512-byte sectors.
    pub size: u64,
    /// Scheme-specific type (hex byte for dos, GUID for gpt).
    pub type_str: String,
    pub uuid: Option<String>,
    pub name: Option<String>,
}

static IDINFOS: [&IdInfo; 2] = [&gpt::GPT, &dos::DOS];

pub(crate) struct PartitionsChain;

impl ChainDriver for PartitionsChain {
    fn id(&self) -> ChainId {
        ChainId::Partitions
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn default_flags(&self) -> u32 {
        part_flags::DEFAULT
    }

    fn supports_filter(&self) -> bool {
        true
    }

    fn idinfos(&self) -> &'static [&'static IdInfo] {
        &IDINFOS
    }

    fn probe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        let ci = ChainId::Partitions;
        pr.values_mut().reset_chain(ci);
        if pr.noscan() {
            return Ok(ProbeOutcome::Done);
        }

        // A partition device has no table of its own; look its entry up in
        // the owning disk instead.
        if pr.chain_state(ci).flags & part_flags::ENTRY_DETAILS != 0
            && !pr.devno().is_none()
            && !pr.is_wholedisk_dev()
        {
            if pr.chain_state(ci).idx.is_some() {
                return Ok(ProbeOutcome::Done);
            }
            pr.chain_state_mut(ci).idx = Some(IDINFOS.len() - 1);
            return probe_partition_details(pr);
        }

        let start = pr.chain_state(ci).idx.map_or(0, |i| i + 1);
        for i in start..IDINFOS.len() {
            pr.chain_state_mut(ci).idx = Some(i);
            if pr.chain_state(ci).is_filtered(i) {
                continue;
            }

            let id = IDINFOS[i];
            let hit = match match_magics(pr, id)? {
                MagicCheck::Miss => continue,
                MagicCheck::Hit(hit) => Some(hit),
                MagicCheck::NoMagics => None,
            };

            debug!(
                target: "bdev::probe::partitions",
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

            // A partition table inside an area a volume manager declared
            // zeroed means the earlier signature is stale.
            pr.use_wiper(0, 512);

            if pr.lookup_value("PTTYPE").is_none() {
                pr.set_value_str("PTTYPE", id.name);
            }
            if let Some(hit) = &hit {
                pr.set_magic(hit.offset, hit.magic);
            }
            return Ok(ProbeOutcome::Found);
        }

        Ok(ProbeOutcome::Done)
    }

    /// One partition table per device; the first match wins and collisions
    /// are handled through the wiper policy, so safeprobe is a plain probe
    /// from the start of the chain.
    fn safeprobe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        self.probe(pr)
    }
}

/// Emit `PART_ENTRY_*` values for a partition device by parsing the owning
/// disk's partition table.
fn probe_partition_details(pr: &mut Prober) -> Result<ProbeOutcome> {
    let devno = pr.devno();
    let Some(partno) = sysfs::partno(devno) else {
        return Ok(ProbeOutcome::Done);
    };
    let Some(disk_devno) = pr.wholedisk_devno() else {
        return Ok(ProbeOutcome::Done);
    };

    let found = {
        let Some(disk) = pr.wholedisk_probe()? else {
            return Ok(ProbeOutcome::Done);
        };
        parse_table(disk)?.and_then(|table| {
            table
                .entries
                .iter()
                .find(|e| e.number == partno)
                .cloned()
                .map(|entry| (table.scheme, entry))
        })
    };
    let Some((scheme, entry)) = found else {
        return Ok(ProbeOutcome::Done);
    };

    pr.set_value_str("PART_ENTRY_SCHEME", scheme);
    pr.set_value_str("PART_ENTRY_NUMBER", &entry.number.to_string());
    pr.set_value_str("PART_ENTRY_TYPE", &entry.type_str);
    if let Some(uuid) = &entry.uuid {
        pr.set_value_str("PART_ENTRY_UUID", uuid);
    }
    if let Some(name) = &entry.name {
        pr.set_value_str("PART_ENTRY_NAME", name);
    }
    pr.set_value_str("PART_ENTRY_OFFSET", &entry.start.to_string());
    pr.set_value_str("PART_ENTRY_SIZE", &entry.size.to_string());
    pr.set_value_str("PART_ENTRY_DISK", &disk_devno.to_string());

    Ok(ProbeOutcome::Found)
}

/// Parse whatever partition table the device carries.
pub(crate) fn parse_table(pr: &mut Prober) -> Result<Option<PartTable>> {
    if let Some(table) = gpt::parse_table(pr)? {
        return Ok(Some(table));
    }
    let Some(sector0) = pr.get_buffer(0, 512)? else {
        return Ok(None);
    };
    Ok(dos::parse_table(&sector0))
}
