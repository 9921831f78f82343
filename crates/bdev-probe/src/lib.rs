#![forbid(unsafe_code)]
//! Low-level block-device signature probing.
//!
//! A [`Prober`] binds a device (or image file) and drives an extensible set
//! of signature recognizers organized into chains — superblocks, topology
//! and partitions. Results are NAME=value pairs harvested from the value
//! list. The usual loop:
//!
//! ```no_run
//! # fn main() -> bdev_error::Result<()> {
//! let mut pr = bdev_probe::Prober::from_filename("/dev/sda1")?;
//! while pr.do_probe()? == bdev_probe::ProbeOutcome::Found {
//!     for v in pr.values() {
//!         println!("{}={}", v.name(), v.as_str());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod chain;
mod config;
mod magic;
mod partitions;
mod superblocks;
mod sysfs;
mod topology;
mod values;

pub use chain::{ChainId, FilterFlag, NCHAINS, Usage};
pub use config::{Config, ENV_CACHE_FILE, ENV_CONFIG_FILE, EvalMethod, default_cache_file};
pub use magic::MagicHit;
pub use partitions::{PartEntry, PartTable, part_flags};
pub use superblocks::sb_flags;
pub use values::ProbeValue;

use bdev_error::{BdevError, Result};
use bdev_types::Devno;
use buffer::BufferCache;
use chain::{ChainDriver, ChainState, bitmap_nbytes, bitmap_set};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use values::ValueList;

/// The fixed chain set, indexed by `ChainId` discriminants.
static CHAINS: [&(dyn ChainDriver); NCHAINS] = [
    &superblocks::SuperblocksChain,
    &topology::TopologyChain,
    &partitions::PartitionsChain,
];

/// Devices at most this big get the tiny-device treatment (floppies and
/// such; RAID probing is pointless and sometimes harmful there).
const TINY_DEV_SIZE: u64 = 1440 * 1024;

/// Upper bound on the number of bytes `do_wipe` will zero at once.
const WIPE_MAX: usize = 8192;

/// Outcome of a probing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A signature matched; results are on the value list.
    Found,
    /// Nothing (more) found.
    Done,
}

#[derive(Debug)]
struct Device {
    file: Arc<File>,
    devno: Devno,
    char_dev: bool,
    block_dev: bool,
    sector_size: u32,
    tiny: bool,
    cdrom: bool,
    noscan: bool,
}

/// Snapshot of the parent prober taken when a clone is created; while the
/// clone covers the same device inside the parent's window, reads are
/// forwarded to the parent's buffer cache.
struct ParentLink {
    cache: Arc<Mutex<BufferCache>>,
    devno: Devno,
    off: u64,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
struct WipeArea {
    off: u64,
    size: u64,
    chain: ChainId,
}

/// Low-level prober bound to (at most) one device at a time.
pub struct Prober {
    dev: Option<Device>,
    off: u64,
    size: u64,
    conf: Arc<Config>,
    chains: [ChainState; NCHAINS],
    buffers: Arc<Mutex<BufferCache>>,
    parent: Option<ParentLink>,
    values: ValueList,
    cur_chain: Option<ChainId>,
    wiper: Option<WipeArea>,
    disk_probe: Option<Box<Prober>>,
    disk_devno: Option<Devno>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    /// New unbound prober using the system configuration (falling back to
    /// built-in defaults when the configuration file is unreadable).
    #[must_use]
    pub fn new() -> Self {
        let conf = Config::read().unwrap_or_else(|_| Arc::new(Config::default()));
        Self::with_config(conf)
    }

    /// New unbound prober with an explicit configuration snapshot. The
    /// `PROBE_OFF` list is applied as a not-in filter on the superblocks
    /// chain.
    #[must_use]
    pub fn with_config(conf: Arc<Config>) -> Self {
        let chains =
            std::array::from_fn(|i| ChainState::new(CHAINS[i].default_enabled(), CHAINS[i].default_flags()));
        let mut pr = Self {
            dev: None,
            off: 0,
            size: 0,
            conf,
            chains,
            buffers: Arc::new(Mutex::new(BufferCache::default())),
            parent: None,
            values: ValueList::default(),
            cur_chain: None,
            wiper: None,
            disk_probe: None,
            disk_devno: None,
        };
        if !pr.conf.probe_off.is_empty() {
            let names: Vec<String> = pr.conf.probe_off.clone();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            // The filter cannot fail for a chain that supports filtering.
            let _ = pr.filter_types(ChainId::Superblocks, FilterFlag::NotIn, &names);
        }
        pr
    }

    /// Open `path` read-only and bind it with an unrestricted window.
    pub fn from_filename(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut pr = Self::new();
        pr.set_device(file, 0, 0)?;
        Ok(pr)
    }

    /// Open `path` read-write (required by [`Prober::do_wipe`]).
    pub fn from_filename_rw(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let mut pr = Self::new();
        pr.set_device(file, 0, 0)?;
        Ok(pr)
    }

    /// Clone this prober: same device, window and configuration, fresh
    /// probing state. While the clone stays inside the parent's window its
    /// buffer reads are forwarded to the parent's cache.
    #[must_use]
    pub fn clone_probe(&self) -> Self {
        debug!(target: "bdev::probe", "allocate a probe clone");
        let mut pr = Self::with_config(self.conf.clone());
        pr.dev = self.dev.as_ref().map(|d| Device {
            file: Arc::clone(&d.file),
            ..*d
        });
        pr.off = self.off;
        pr.size = self.size;
        pr.disk_devno = self.disk_devno;
        pr.parent = Some(ParentLink {
            cache: Arc::clone(&self.buffers),
            devno: self.devno(),
            off: self.off,
            size: self.size,
        });
        pr
    }

    // ── Device binding ──────────────────────────────────────────────────

    /// Assign a device to the prober and reset all probing state.
    ///
    /// `size == 0` means "rest of the device past `off`". Fails when the
    /// window does not fit into the device.
    pub fn set_device(&mut self, file: File, off: u64, size: u64) -> Result<()> {
        self.reset_probe();
        // A fresh cache (rather than clearing the shared one) keeps clones
        // of the previous device reading consistent data.
        self.buffers = Arc::new(Mutex::new(BufferCache::default()));
        self.dev = None;
        self.disk_probe = None;
        self.disk_devno = None;
        self.off = off;
        self.size = 0;

        let meta = file.metadata()?;
        let mode = meta.mode();
        let block_dev = mode & libc::S_IFMT == libc::S_IFBLK;
        let char_dev = mode & libc::S_IFMT == libc::S_IFCHR;
        let regular = mode & libc::S_IFMT == libc::S_IFREG;
        if !block_dev && !char_dev && !regular {
            return Err(BdevError::InvalidArgument(
                "not a block device, character device or regular file",
            ));
        }

        let devno = if block_dev || char_dev {
            Devno(meta.rdev())
        } else {
            Devno::NONE
        };

        let devsize = if block_dev {
            // st_size is 0 for block devices; seeking to the end through a
            // borrowed handle avoids any ioctl.
            let mut f = &file;
            f.seek(SeekFrom::End(0))?
        } else if char_dev {
            1 // UBI volumes and the like are character devices
        } else {
            meta.len()
        };

        let mut winsize = if size != 0 { size } else { devsize };
        if off != 0 && size == 0 {
            winsize = devsize.saturating_sub(off);
        }
        if off.checked_add(winsize).is_none_or(|end| end > devsize) {
            debug!(
                target: "bdev::probe",
                off, size = winsize, devsize, "probing area is bigger than the device"
            );
            return Err(BdevError::InvalidArgument(
                "probing area escapes the device",
            ));
        }
        self.size = winsize;

        let tiny = winsize <= TINY_DEV_SIZE && !char_dev;
        let noscan = block_dev && sysfs::devno_is_lvm_private(devno);
        let cdrom = block_dev && !tiny && sysfs::devno_is_cdrom(devno);
        let sector_size = if block_dev {
            sysfs::queue_attr(devno, "logical_block_size")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(bdev_types::DEFAULT_SECTOR_SIZE)
        } else {
            bdev_types::DEFAULT_SECTOR_SIZE
        };

        self.dev = Some(Device {
            file: Arc::new(file),
            devno,
            char_dev,
            block_dev,
            sector_size,
            tiny,
            cdrom,
            noscan,
        });

        debug!(
            target: "bdev::probe",
            off = self.off,
            size = self.size,
            devno = %devno,
            tiny,
            noscan,
            "ready for low-probing"
        );
        Ok(())
    }

    /// Move the probing window. Resets buffers but keeps the device.
    pub fn set_dimension(&mut self, off: u64, size: u64) -> Result<()> {
        let dev = self
            .dev
            .as_mut()
            .ok_or(BdevError::InvalidArgument("no device assigned"))?;
        debug!(
            target: "bdev::probe",
            old_off = self.off,
            old_size = self.size,
            off,
            size,
            "changing probing area"
        );
        self.off = off;
        self.size = size;
        dev.tiny = size <= TINY_DEV_SIZE && !dev.char_dev;
        self.buffers = Arc::new(Mutex::new(BufferCache::default()));
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────────

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.off
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 512-byte sector count of the probing window.
    #[must_use]
    pub fn sectors(&self) -> u64 {
        self.size >> 9
    }

    /// Logical sector size of the device (512 when unknown).
    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.dev
            .as_ref()
            .map_or(bdev_types::DEFAULT_SECTOR_SIZE, |d| d.sector_size)
    }

    /// Device number, or `Devno::NONE` for regular files.
    #[must_use]
    pub fn devno(&self) -> Devno {
        self.dev.as_ref().map_or(Devno::NONE, |d| d.devno)
    }

    /// Devno of the whole disk owning this device (lazily resolved).
    pub fn wholedisk_devno(&mut self) -> Option<Devno> {
        if self.disk_devno.is_none() {
            let devno = self.devno();
            if devno.is_none() {
                return None;
            }
            self.disk_devno = sysfs::wholedisk_devno(devno);
        }
        self.disk_devno
    }

    /// True when the device is a whole disk rather than a partition.
    pub fn is_wholedisk_dev(&mut self) -> bool {
        let devno = self.devno();
        if devno.is_none() {
            return false;
        }
        self.wholedisk_devno() == Some(devno)
    }

    /// Lazily opened prober for the whole disk owning this partition
    /// device. `None` when the device already is a whole disk (or has no
    /// devno at all).
    pub fn wholedisk_probe(&mut self) -> Result<Option<&mut Prober>> {
        if self.is_wholedisk_dev() {
            return Ok(None);
        }
        let Some(disk) = self.wholedisk_devno() else {
            return Ok(None);
        };

        if self
            .disk_probe
            .as_ref()
            .is_some_and(|dp| dp.devno() != disk)
        {
            self.disk_probe = None;
        }
        if self.disk_probe.is_none() {
            let Some(path) = sysfs::devno_to_devname(disk) else {
                return Ok(None);
            };
            debug!(target: "bdev::probe", disk = %path.display(), "allocate a wholedisk probe");
            let file = File::open(&path)?;
            let mut pr = Self::with_config(self.conf.clone());
            pr.set_device(file, 0, 0)?;
            self.disk_probe = Some(Box::new(pr));
        }
        Ok(self.disk_probe.as_deref_mut())
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.conf
    }

    pub(crate) fn is_tiny(&self) -> bool {
        self.dev.as_ref().is_some_and(|d| d.tiny)
    }

    pub(crate) fn is_cdrom(&self) -> bool {
        self.dev.as_ref().is_some_and(|d| d.cdrom)
    }

    pub(crate) fn noscan(&self) -> bool {
        self.dev.as_ref().is_some_and(|d| d.noscan)
    }

    #[must_use]
    pub fn is_block_device(&self) -> bool {
        self.dev.as_ref().is_some_and(|d| d.block_dev)
    }

    /// `(offset, length)` of the cached buffer ranges, for diagnostics.
    #[must_use]
    pub fn buffer_ranges(&self) -> Vec<(u64, u64)> {
        self.buffers.lock().ranges()
    }

    // ── Buffer access ───────────────────────────────────────────────────

    /// Read `len` bytes at `off` within the probing window.
    ///
    /// `Ok(None)` when the request escapes the window (a magic simply
    /// cannot be present there); `InvalidArgument` for a zero-length
    /// request or a zero-size window.
    pub(crate) fn get_buffer(&mut self, off: u64, len: u64) -> Result<Option<Vec<u8>>> {
        let dev = self
            .dev
            .as_ref()
            .ok_or(BdevError::InvalidArgument("no device assigned"))?;
        if self.size == 0 {
            return Err(BdevError::InvalidArgument("zero-size probing window"));
        }
        if len == 0 {
            return Err(BdevError::InvalidArgument("zero-length buffer request"));
        }

        let real_off = self.off + off;
        if real_off + len > self.off + self.size {
            return Ok(None);
        }

        // A clone pointing into the parent's window uses the parent's
        // buffers (and the parent's window for chunk geometry).
        let (cache, win_off, win_size) = match &self.parent {
            Some(p)
                if p.devno == dev.devno
                    && p.off <= self.off
                    && p.off + p.size >= self.off + self.size =>
            {
                (Arc::clone(&p.cache), p.off, p.size)
            }
            _ => (Arc::clone(&self.buffers), self.off, self.size),
        };

        let data = cache
            .lock()
            .get(&dev.file, dev.char_dev, win_off, win_size, real_off, len)?;
        Ok(Some(data))
    }

    // ── Values ──────────────────────────────────────────────────────────

    pub fn values(&self) -> impl Iterator<Item = &ProbeValue> {
        self.values.iter()
    }

    #[must_use]
    pub fn lookup_value(&self, name: &str) -> Option<&ProbeValue> {
        self.values.lookup(name)
    }

    #[must_use]
    pub fn has_value(&self, name: &str) -> bool {
        self.values.lookup(name).is_some()
    }

    #[must_use]
    pub fn numof_values(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn values_mut(&mut self) -> &mut ValueList {
        &mut self.values
    }

    pub(crate) fn set_value(&mut self, name: &'static str, data: Vec<u8>) {
        let chain = self.cur_chain.expect("values are set during probing");
        self.values.set(chain, name, data);
    }

    pub(crate) fn set_value_str(&mut self, name: &'static str, value: &str) {
        self.set_value(name, value.as_bytes().to_vec());
    }

    fn sb_flag(&self, flag: u32) -> bool {
        self.chains[ChainId::Superblocks.index()].flags & flag != 0
    }

    /// LABEL from a NUL-padded on-disk field.
    pub(crate) fn set_label_from(&mut self, raw: &[u8]) {
        let label = bdev_types::trim_nul_padded(raw);
        if !label.is_empty() {
            self.set_label_str(&label);
        }
    }

    pub(crate) fn set_label_str(&mut self, label: &str) {
        if self.sb_flag(sb_flags::LABEL) {
            self.set_value_str("LABEL", label);
        }
    }

    /// UUID from a 16-byte DCE field; all-zero UUIDs are not reported.
    pub(crate) fn set_uuid(&mut self, uuid: &[u8; 16]) {
        if bdev_types::uuid_is_empty(uuid) {
            return;
        }
        if self.sb_flag(sb_flags::UUID) {
            let s = bdev_types::format_uuid(uuid);
            self.set_value_str("UUID", &s);
        }
    }

    pub(crate) fn set_uuid_str(&mut self, uuid: &str) {
        if self.sb_flag(sb_flags::UUID) {
            self.set_value_str("UUID", uuid);
        }
    }

    pub(crate) fn set_version_str(&mut self, version: &str) {
        if self.sb_flag(sb_flags::VERSION) {
            self.set_value_str("VERSION", version);
        }
    }

    pub(crate) fn set_sectype(&mut self, sectype: &str) {
        if self.sb_flag(sb_flags::SECTYPE) {
            self.set_value_str("SEC_TYPE", sectype);
        }
    }

    /// Record the matched magic bytes and their offset, under the chain's
    /// magic flag.
    pub(crate) fn set_magic(&mut self, offset: u64, magic: &'static [u8]) {
        let Some(chain) = self.cur_chain else { return };
        match chain {
            ChainId::Superblocks if self.sb_flag(sb_flags::MAGIC) => {
                self.set_value("SBMAGIC", magic.to_vec());
                self.set_value_str("SBMAGIC_OFFSET", &offset.to_string());
            }
            ChainId::Partitions
                if self.chains[ChainId::Partitions.index()].flags & part_flags::MAGIC != 0 =>
            {
                self.set_value("PTMAGIC", magic.to_vec());
                self.set_value_str("PTMAGIC_OFFSET", &offset.to_string());
            }
            _ => {}
        }
    }

    /// Check an on-disk checksum. A mismatch is accepted (and flagged with
    /// `SBBADCSUM=1`) only when the superblocks chain opted into bad
    /// checksums; otherwise the match must be dropped.
    pub(crate) fn verify_csum(&mut self, csum: u64, expected: u64) -> bool {
        if csum == expected {
            return true;
        }
        debug!(
            target: "bdev::probe",
            got = format_args!("{csum:#x}"),
            expected = format_args!("{expected:#x}"),
            "incorrect checksum"
        );
        if self.cur_chain == Some(ChainId::Superblocks) && self.sb_flag(sb_flags::BADCSUM) {
            self.set_value_str("SBBADCSUM", "1");
            return true;
        }
        false
    }

    // ── Chain state, enable & flags ─────────────────────────────────────

    pub(crate) fn chain_state(&self, chain: ChainId) -> &ChainState {
        &self.chains[chain.index()]
    }

    pub(crate) fn chain_state_mut(&mut self, chain: ChainId) -> &mut ChainState {
        &mut self.chains[chain.index()]
    }

    pub(crate) fn chain_flags(&self, chain: ChainId) -> u32 {
        self.chains[chain.index()].flags
    }

    pub fn enable_superblocks(&mut self, enable: bool) {
        self.chains[ChainId::Superblocks.index()].enabled = enable;
    }

    /// Set the `sb_flags` controlling which values the superblocks chain
    /// reports.
    pub fn set_superblocks_flags(&mut self, flags: u32) {
        self.chains[ChainId::Superblocks.index()].flags = flags;
    }

    pub fn enable_partitions(&mut self, enable: bool) {
        self.chains[ChainId::Partitions.index()].enabled = enable;
    }

    pub fn set_partitions_flags(&mut self, flags: u32) {
        self.chains[ChainId::Partitions.index()].flags = flags;
    }

    pub fn enable_topology(&mut self, enable: bool) {
        self.chains[ChainId::Topology.index()].enabled = enable;
    }

    // ── Filters ─────────────────────────────────────────────────────────

    /// Touching a chain's filter always restarts probing from scratch.
    fn filter_touch(&mut self) {
        self.cur_chain = None;
        for st in &mut self.chains {
            st.reset_position();
        }
    }

    fn filter_chain_where(
        &mut self,
        chain: ChainId,
        flag: FilterFlag,
        pred: impl Fn(&chain::IdInfo) -> bool,
    ) -> Result<()> {
        self.filter_touch();
        let drv = CHAINS[chain.index()];
        if !drv.supports_filter() {
            return Err(BdevError::InvalidArgument("chain does not support filtering"));
        }
        let infos = drv.idinfos();
        let mut bmp = vec![0_u8; bitmap_nbytes(infos.len())];
        for (i, id) in infos.iter().enumerate() {
            let selected = pred(id);
            let skip = match flag {
                FilterFlag::OnlyIn => !selected,
                FilterFlag::NotIn => selected,
            };
            if skip {
                bitmap_set(&mut bmp, i);
            }
        }
        debug!(
            target: "bdev::probe",
            chain = chain.name(),
            "new probing type-filter initialized"
        );
        self.chains[chain.index()].filter = Some(bmp);
        Ok(())
    }

    fn filter_types(&mut self, chain: ChainId, flag: FilterFlag, names: &[&str]) -> Result<()> {
        self.filter_chain_where(chain, flag, |id| names.contains(&id.name))
    }

    /// Skip (or keep only) the named superblock signatures.
    pub fn filter_superblocks_type(&mut self, flag: FilterFlag, names: &[&str]) -> Result<()> {
        self.filter_types(ChainId::Superblocks, flag, names)
    }

    /// Skip (or keep only) superblock signatures of the given usage
    /// classes.
    pub fn filter_superblocks_usage(&mut self, flag: FilterFlag, usages: &[Usage]) -> Result<()> {
        self.filter_chain_where(ChainId::Superblocks, flag, |id| usages.contains(&id.usage))
    }

    pub fn filter_partitions_type(&mut self, flag: FilterFlag, names: &[&str]) -> Result<()> {
        self.filter_types(ChainId::Partitions, flag, names)
    }

    pub fn invert_superblocks_filter(&mut self) -> Result<()> {
        self.invert_filter(ChainId::Superblocks)
    }

    pub fn invert_partitions_filter(&mut self) -> Result<()> {
        self.invert_filter(ChainId::Partitions)
    }

    fn invert_filter(&mut self, chain: ChainId) -> Result<()> {
        self.filter_touch();
        let st = &mut self.chains[chain.index()];
        let bmp = st
            .filter
            .as_mut()
            .ok_or(BdevError::InvalidArgument("no filter to invert"))?;
        chain::bitmap_invert(bmp);
        debug!(target: "bdev::probe", chain = chain.name(), "probing filter inverted");
        Ok(())
    }

    pub fn reset_superblocks_filter(&mut self) {
        self.reset_filter(ChainId::Superblocks);
    }

    pub fn reset_partitions_filter(&mut self) {
        self.reset_filter(ChainId::Partitions);
    }

    fn reset_filter(&mut self, chain: ChainId) {
        self.filter_touch();
        self.chains[chain.index()].filter = None;
    }

    // ── Probing ─────────────────────────────────────────────────────────

    fn probe_start(&mut self) {
        debug!(target: "bdev::probe", "start probe");
        self.cur_chain = None;
        self.wiper = None;
    }

    fn probe_end(&mut self) {
        debug!(target: "bdev::probe", "end probe");
        self.cur_chain = None;
        self.wiper = None;
    }

    /// Zeroize probing results and rewind the probing position. Filters and
    /// the assigned device are kept.
    pub fn reset_probe(&mut self) {
        self.values.reset();
        self.wiper = None;
        self.cur_chain = None;
        for st in &mut self.chains {
            st.reset_position();
        }
    }

    /// One-match-per-call iteration over all enabled chains, in strict
    /// chain order and descriptor order within each chain. Call in a loop
    /// until `Done`.
    pub fn do_probe(&mut self) -> Result<ProbeOutcome> {
        if self.noscan() {
            return Ok(ProbeOutcome::Done);
        }

        let mut prev_none = true;
        loop {
            match self.cur_chain {
                None => {
                    self.probe_start();
                    self.cur_chain = Some(ChainId::Superblocks);
                }
                Some(chain) => {
                    // Move to the next chain only when the previous probing
                    // found nothing and the current chain is disabled,
                    // exhausted, or bailed out right at the start.
                    let st = &self.chains[chain.index()];
                    let nidinfos = CHAINS[chain.index()].idinfos().len();
                    let exhausted =
                        !st.enabled || st.idx.is_none_or(|idx| idx + 1 == nidinfos);
                    if prev_none && exhausted {
                        match chain.next() {
                            Some(next) => self.cur_chain = Some(next),
                            None => {
                                self.probe_end();
                                return Ok(ProbeOutcome::Done);
                            }
                        }
                    }
                }
            }

            let chain = self.cur_chain.expect("set above");
            if !self.chains[chain.index()].enabled {
                prev_none = true;
                continue;
            }

            debug!(
                target: "bdev::probe",
                chain = chain.name(),
                idx = ?self.chains[chain.index()].idx,
                "chain probe"
            );
            match CHAINS[chain.index()].probe(self)? {
                ProbeOutcome::Found => return Ok(ProbeOutcome::Found),
                ProbeOutcome::Done => prev_none = true,
            }
        }
    }

    /// Gather the first result from every enabled chain, checking for
    /// ambivalent results (two or more intolerant signatures on one
    /// device). Errors with [`BdevError::Ambivalent`] in that case.
    pub fn do_safeprobe(&mut self) -> Result<ProbeOutcome> {
        self.run_all_chains(true)
    }

    /// Same as [`Prober::do_safeprobe`] but never reports ambivalence.
    pub fn do_fullprobe(&mut self) -> Result<ProbeOutcome> {
        self.run_all_chains(false)
    }

    fn run_all_chains(&mut self, safe: bool) -> Result<ProbeOutcome> {
        if self.noscan() {
            return Ok(ProbeOutcome::Done);
        }
        self.probe_start();

        let mut count = 0_usize;
        let mut failure = None;
        for i in 0..NCHAINS {
            let chain = ChainId::from_index(i).expect("i < NCHAINS");
            self.cur_chain = Some(chain);
            if !self.chains[i].enabled {
                continue;
            }

            debug!(
                target: "bdev::probe",
                chain = chain.name(),
                safe,
                "chain safeprobe"
            );
            self.chains[i].reset_position();
            let rc = if safe {
                CHAINS[i].safeprobe(self)
            } else {
                CHAINS[i].probe(self)
            };
            self.chains[i].reset_position();

            match rc {
                Ok(ProbeOutcome::Found) => count += 1,
                Ok(ProbeOutcome::Done) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        self.probe_end();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(if count > 0 {
            ProbeOutcome::Found
        } else {
            ProbeOutcome::Done
        })
    }

    /// Move the probing position one step back so the next
    /// [`Prober::do_probe`] re-runs the previously matched recognizer.
    /// Invalidates the buffer cache: the caller may have modified the
    /// device.
    pub fn step_back(&mut self) -> Result<()> {
        let chain = self
            .cur_chain
            .ok_or(BdevError::InvalidArgument("no current chain"))?;

        self.buffers.lock().reset();

        let st = &mut self.chains[chain.index()];
        st.idx = match st.idx {
            Some(idx) if idx > 0 => Some(idx - 1),
            _ => None,
        };
        debug!(
            target: "bdev::probe",
            chain = chain.name(),
            idx = ?st.idx,
            "step back"
        );

        if st.idx.is_none() {
            // do_probe advances past a chain whose index is the pre-start
            // sentinel, so rewind the chain pointer as well.
            self.wiper = None;
            self.cur_chain = match chain.prev() {
                Some(prev) if prev.index() > 0 => Some(prev),
                _ => None,
            };
        }
        Ok(())
    }

    /// Erase the currently detected signature by zeroing its magic bytes.
    ///
    /// Requires the device to be writable and the chain's magic flag to
    /// have been set during probing (the magic offset and length come from
    /// the `SBMAGIC`/`PTMAGIC` values). After a real wipe the prober steps
    /// back so the next [`Prober::do_probe`] re-runs the same recognizer,
    /// exposing backup superblocks.
    pub fn do_wipe(&mut self, dry_run: bool) -> Result<()> {
        let chain = self
            .cur_chain
            .ok_or(BdevError::InvalidArgument("no current chain"))?;

        let (off_name, magic_name) = match chain {
            ChainId::Superblocks => ("SBMAGIC_OFFSET", "SBMAGIC"),
            ChainId::Partitions => ("PTMAGIC_OFFSET", "PTMAGIC"),
            ChainId::Topology => return Ok(()),
        };

        let Some(off_val) = self.values.lookup(off_name) else {
            return Ok(());
        };
        let Some(magic_val) = self.values.lookup(magic_name) else {
            return Ok(());
        };
        let offset: u64 = off_val
            .as_str()
            .parse()
            .map_err(|_| BdevError::InvalidArgument("unparsable magic offset"))?;
        let len = magic_val.data().len().min(WIPE_MAX);
        if len == 0 {
            return Ok(());
        }

        debug!(
            target: "bdev::probe",
            offset,
            len,
            chain = chain.name(),
            dry_run,
            "do_wipe"
        );
        if dry_run {
            return Ok(());
        }

        let file = {
            let dev = self
                .dev
                .as_ref()
                .ok_or(BdevError::InvalidArgument("no device assigned"))?;
            Arc::clone(&dev.file)
        };
        let zeros = vec![0_u8; len];
        file.write_all_at(&zeros, self.off + offset)?;
        file.sync_all()?;
        self.step_back()
    }

    // ── Wiper policy ────────────────────────────────────────────────────

    /// Record that the signature just detected is known to zero the leading
    /// `[off, off+size)` region of the device (pvcreate, mkswap). Used
    /// later to resolve conflicts with partition tables found inside the
    /// region.
    pub(crate) fn set_wiper(&mut self, off: u64, size: u64) {
        if size == 0 {
            self.wiper = None;
            return;
        }
        let Some(chain) = self.cur_chain else { return };
        let st = &self.chains[chain.index()];
        let Some(idx) = st.idx else { return };
        if idx >= CHAINS[chain.index()].idinfos().len() {
            return;
        }
        debug!(
            target: "bdev::probe",
            chain = chain.name(),
            off,
            size,
            "wiper set"
        );
        self.wiper = Some(WipeArea { off, size, chain });
    }

    pub(crate) fn is_wiped(&self, off: u64, size: u64) -> Option<ChainId> {
        if size == 0 {
            return None;
        }
        let w = self.wiper?;
        (w.off <= off && off + size <= w.off + w.size).then_some(w.chain)
    }

    /// A later signature was found inside a previously wiped area: the
    /// earlier match is stale, so its values and the wipe tracking are
    /// discarded.
    pub(crate) fn use_wiper(&mut self, off: u64, size: u64) {
        if let Some(chain) = self.is_wiped(off, size) {
            debug!(
                target: "bdev::probe",
                chain = chain.name(),
                "previously wiped area modified, ignoring previous results"
            );
            self.wiper = None;
            self.values.reset_chain(chain);
        }
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("off", &self.off)
            .field("size", &self.size)
            .field("devno", &self.devno())
            .field("cur_chain", &self.cur_chain)
            .field("values", &self.values.len())
            .finish_non_exhaustive()
    }
}
