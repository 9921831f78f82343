//! The topology chain: I/O geometry of the device, read from sysfs.
//!
//! Disabled by default like the other auxiliary chains; image files have no
//! devno and therefore no topology.

use crate::chain::{ChainDriver, ChainId, IdInfo, Usage};
use crate::magic::MagicHit;
use crate::{ProbeOutcome, Prober, sysfs};
use bdev_error::Result;

static SYSFS: IdInfo = IdInfo {
    name: "sysfs",
    usage: Usage::Other,
    tolerant: false,
    minsz: None,
    magics: &[],
    probe_fn: probe_sysfs_topology,
};

static IDINFOS: [&IdInfo; 1] = [&SYSFS];

pub(crate) struct TopologyChain;

impl ChainDriver for TopologyChain {
    fn id(&self) -> ChainId {
        ChainId::Topology
    }

    fn default_enabled(&self) -> bool {
        false
    }

    fn default_flags(&self) -> u32 {
        0
    }

    fn supports_filter(&self) -> bool {
        false
    }

    fn idinfos(&self) -> &'static [&'static IdInfo] {
        &IDINFOS
    }

    fn probe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        let ci = ChainId::Topology;
        pr.values_mut().reset_chain(ci);
        if pr.noscan() || pr.chain_state(ci).idx.is_some() {
            return Ok(ProbeOutcome::Done);
        }
        pr.chain_state_mut(ci).idx = Some(0);
        (SYSFS.probe_fn)(pr, None)
    }

    fn safeprobe(&self, pr: &mut Prober) -> Result<ProbeOutcome> {
        self.probe(pr)
    }
}

fn probe_sysfs_topology(pr: &mut Prober, _mag: Option<&MagicHit>) -> Result<ProbeOutcome> {
    let devno = pr.devno();
    if devno.is_none() {
        return Ok(ProbeOutcome::Done);
    }

    let attrs: [(&str, Option<u64>); 5] = [
        ("LOGICAL_SECTOR_SIZE", sysfs::queue_attr(devno, "logical_block_size")),
        ("PHYSICAL_SECTOR_SIZE", sysfs::queue_attr(devno, "physical_block_size")),
        ("MINIMUM_IO_SIZE", sysfs::queue_attr(devno, "minimum_io_size")),
        ("OPTIMAL_IO_SIZE", sysfs::queue_attr(devno, "optimal_io_size")),
        ("ALIGNMENT_OFFSET", sysfs::read_u64_attr(devno, "alignment_offset")),
    ];

    let mut any = false;
    for (name, value) in attrs {
        if let Some(value) = value {
            pr.set_value_str(name, &value.to_string());
            any = true;
        }
    }

    Ok(if any {
        ProbeOutcome::Found
    } else {
        ProbeOutcome::Done
    })
}
