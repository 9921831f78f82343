#![forbid(unsafe_code)]
//! Persistent device-tag cache.
//!
//! The cache lets unprivileged callers translate between device names and
//! tags without probing, and spares repeated scans when many devices are
//! involved. On disk it is the historical tab format, one device per line:
//!
//! ```text
//! /dev/sda1 DEVNO=8:1 TIME=1722400000.123456 PRI=0 TYPE="ext4" UUID="…"
//! ```
//!
//! `DEVNO`, `TIME` and `PRI` are mandatory; everything else is a probing
//! result tag. The file is rewritten atomically when dirty.

use bdev_error::{BdevError, Result};
use bdev_probe::{Config, ProbeOutcome, Prober};
use bdev_types::{Devno, TagSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One cached device with its probing results.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDevice {
    pub name: String,
    pub devno: Devno,
    /// Probe time, unix seconds with fractional part.
    pub time: f64,
    /// Priority; callers break same-tag conflicts by preferring higher
    /// values.
    pub pri: i32,
    pub tags: Vec<(String, String)>,
}

impl CachedDevice {
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn to_line(&self) -> String {
        let mut line = format!(
            "{} DEVNO={} TIME={:.6} PRI={}",
            self.name, self.devno, self.time, self.pri
        );
        for (name, value) in &self.tags {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            line.push_str(&format!(" {name}=\"{escaped}\""));
        }
        line
    }

    fn from_line(line: &str) -> Result<Self> {
        let mut fields = split_fields(line).into_iter();
        let name = fields
            .next()
            .ok_or(BdevError::InvalidArgument("empty cache line"))?;

        let mut devno = None;
        let mut time = None;
        let mut pri = None;
        let mut tags = Vec::new();
        for field in fields {
            let spec = TagSpec::parse(&field)
                .map_err(|_| BdevError::InvalidArgument("malformed cache tag"))?;
            match spec.name.as_str() {
                "DEVNO" => {
                    devno = Some(
                        Devno::parse(&spec.value)
                            .map_err(|_| BdevError::InvalidArgument("bad DEVNO"))?,
                    );
                }
                "TIME" => {
                    time = Some(
                        spec.value
                            .parse::<f64>()
                            .map_err(|_| BdevError::InvalidArgument("bad TIME"))?,
                    );
                }
                "PRI" => {
                    pri = Some(
                        spec.value
                            .parse::<i32>()
                            .map_err(|_| BdevError::InvalidArgument("bad PRI"))?,
                    );
                }
                _ => tags.push((spec.name, spec.value)),
            }
        }

        match (devno, time, pri) {
            (Some(devno), Some(time), Some(pri)) => Ok(Self {
                name,
                devno,
                time,
                pri,
                tags,
            }),
            _ => Err(BdevError::InvalidArgument(
                "cache line misses a mandatory field",
            )),
        }
    }
}

/// Split a cache line on whitespace, keeping double-quoted tag values (with
/// their backslash escapes) intact.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                cur.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    fields.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        fields.push(cur);
    }
    fields
}

/// The device cache: an ordered device list backed by a tab-format file.
#[derive(Debug)]
pub struct DevCache {
    filename: PathBuf,
    devices: Vec<CachedDevice>,
    changed: bool,
    conf: Arc<Config>,
}

impl DevCache {
    /// Open the cache at the configured location (`BDEV_CACHE_FILE`, the
    /// configuration file, or the built-in default).
    pub fn open() -> Result<Self> {
        let conf = Config::read().unwrap_or_else(|_| Arc::new(Config::default()));
        let filename = std::env::var_os(bdev_probe::ENV_CACHE_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| conf.cache_file.clone());
        Self::open_with(filename, conf)
    }

    /// Open a cache at an explicit path.
    pub fn open_file(filename: impl Into<PathBuf>) -> Result<Self> {
        let conf = Config::read().unwrap_or_else(|_| Arc::new(Config::default()));
        Self::open_with(filename.into(), conf)
    }

    fn open_with(filename: PathBuf, conf: Arc<Config>) -> Result<Self> {
        let mut cache = Self {
            filename,
            devices: Vec::new(),
            changed: false,
            conf,
        };
        cache.read()?;
        Ok(cache)
    }

    fn read(&mut self) -> Result<()> {
        let text = match std::fs::read_to_string(&self.filename) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        debug!(target: "bdev::cache", file = %self.filename.display(), "reading cache");

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match CachedDevice::from_line(line) {
                Ok(dev) => self.devices.push(dev),
                // Parse errors are recoverable; a stale or corrupt entry is
                // simply dropped at the next rewrite.
                Err(err) => {
                    debug!(target: "bdev::cache", %err, line, "skipping cache line");
                    self.changed = true;
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    #[must_use]
    pub fn devices(&self) -> &[CachedDevice] {
        &self.devices
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.changed
    }

    #[must_use]
    pub fn lookup_device(&self, name: &str) -> Option<&CachedDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Device carrying `tag == value`; among several, the highest priority
    /// wins (callers impose any further policy).
    #[must_use]
    pub fn find_by_tag(&self, tag: &str, value: &str) -> Option<&CachedDevice> {
        self.devices
            .iter()
            .filter(|d| d.tag(tag) == Some(value))
            .max_by_key(|d| d.pri)
    }

    /// Probe `name` and insert or refresh its cache entry. Returns whether
    /// the device carried any recognizable signature.
    pub fn probe_device(&mut self, name: &str) -> Result<bool> {
        let mut pr = Prober::with_config(Arc::clone(&self.conf));
        let file = std::fs::File::open(name)?;
        pr.set_device(file, 0, 0)?;

        let outcome = pr.do_safeprobe()?;
        let tags: Vec<(String, String)> = pr
            .values()
            .map(|v| (v.name().to_owned(), v.as_str().into_owned()))
            .collect();

        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let devno = pr.devno();
        let pri = default_pri(name);

        match self.devices.iter_mut().find(|d| d.name == name) {
            Some(dev) => {
                dev.devno = devno;
                dev.time = time;
                dev.tags = tags;
            }
            None => self.devices.push(CachedDevice {
                name: name.to_owned(),
                devno,
                time,
                pri,
                tags,
            }),
        }
        self.changed = true;
        Ok(outcome == ProbeOutcome::Found)
    }

    /// Garbage collection: drop entries whose device no longer exists.
    pub fn gc(&mut self) {
        let before = self.devices.len();
        self.devices.retain(|dev| {
            let exists = std::fs::metadata(&dev.name).is_ok();
            if !exists {
                debug!(target: "bdev::cache", name = %dev.name, "dropping vanished device");
            }
            exists
        });
        if self.devices.len() != before {
            self.changed = true;
        }
    }

    /// Write the cache back if dirty. The rewrite is atomic: a sibling
    /// temporary file is renamed over the target.
    pub fn save(&mut self) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        debug!(target: "bdev::cache", file = %self.filename.display(), "saving cache");

        if let Some(parent) = self.filename.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut text = String::new();
        for dev in &self.devices {
            text.push_str(&dev.to_line());
            text.push('\n');
        }

        let tmp = self.filename.with_extension("tab.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.filename)?;
        self.changed = false;
        Ok(())
    }
}

/// Default cache priority by device class: device-mapper volumes shadow
/// the block devices they are built from.
fn default_pri(name: &str) -> i32 {
    if name.starts_with("/dev/mapper/") || name.starts_with("/dev/dm-") {
        40
    } else if name.starts_with("/dev/md") {
        30
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
/dev/sda1 DEVNO=8:1 TIME=1722400000.123456 PRI=0 TYPE=\"ext4\" UUID=\"6c96214b-a52f-4f0e-921d-0a1b2c3d4e5f\" LABEL=\"root disk\"
/dev/sdb1 DEVNO=8:17 TIME=1722400001.000000 PRI=0 TYPE=\"vfat\"
/dev/mapper/data DEVNO=253:0 TIME=1722400002.500000 PRI=40 TYPE=\"ext4\" UUID=\"feedface-0000-4000-8000-000000000001\"
";

    fn sample_cache() -> (tempfile::NamedTempFile, DevCache) {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(SAMPLE.as_bytes()).expect("write");
        let cache = DevCache::open_file(tmp.path()).expect("open");
        (tmp, cache)
    }

    #[test]
    fn parses_the_tab_format() {
        let (_tmp, cache) = sample_cache();
        assert_eq!(cache.devices().len(), 3);
        assert!(!cache.is_dirty());

        let sda1 = cache.lookup_device("/dev/sda1").expect("sda1");
        assert_eq!(sda1.devno, Devno::new(8, 1));
        assert_eq!(sda1.pri, 0);
        assert!((sda1.time - 1_722_400_000.123_456).abs() < 1e-6);
        assert_eq!(sda1.tag("TYPE"), Some("ext4"));
        assert_eq!(sda1.tag("LABEL"), Some("root disk"));
    }

    #[test]
    fn mandatory_fields_are_enforced() {
        assert!(CachedDevice::from_line("/dev/sda1 TIME=1.0 PRI=0").is_err());
        assert!(CachedDevice::from_line("/dev/sda1 DEVNO=8:1 PRI=0").is_err());
        assert!(CachedDevice::from_line("/dev/sda1 DEVNO=8:1 TIME=1.0").is_err());
        assert!(CachedDevice::from_line("/dev/sda1 DEVNO=8:1 TIME=1.0 PRI=0").is_ok());
    }

    #[test]
    fn corrupt_lines_are_skipped_and_marked_dirty() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(tmp, "not a valid line at all =").expect("write");
        writeln!(tmp, "/dev/sda1 DEVNO=8:1 TIME=1.0 PRI=0 TYPE=\"ext4\"").expect("write");
        let cache = DevCache::open_file(tmp.path()).expect("open");
        assert_eq!(cache.devices().len(), 1);
        assert!(cache.is_dirty());
    }

    #[test]
    fn find_by_tag_prefers_higher_priority() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(tmp, "/dev/sda1 DEVNO=8:1 TIME=1.0 PRI=0 LABEL=\"dup\"").expect("write");
        writeln!(tmp, "/dev/mapper/x DEVNO=253:1 TIME=1.0 PRI=40 LABEL=\"dup\"").expect("write");
        let cache = DevCache::open_file(tmp.path()).expect("open");

        let dev = cache.find_by_tag("LABEL", "dup").expect("found");
        assert_eq!(dev.name, "/dev/mapper/x");
        assert!(cache.find_by_tag("LABEL", "other").is_none());
    }

    #[test]
    fn save_round_trips_and_quotes_values() {
        let (tmp, mut cache) = sample_cache();
        cache.changed = true;
        cache.save().expect("save");
        assert!(!cache.is_dirty());

        let reread = DevCache::open_file(tmp.path()).expect("reopen");
        assert_eq!(reread.devices(), cache.devices());
    }

    #[test]
    fn gc_drops_vanished_devices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let existing = dir.path().join("present");
        std::fs::write(&existing, b"").expect("touch");

        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            tmp,
            "{} DEVNO=8:1 TIME=1.0 PRI=0 TYPE=\"ext4\"",
            existing.display()
        )
        .expect("write");
        writeln!(tmp, "/no/such/device DEVNO=8:2 TIME=1.0 PRI=0").expect("write");

        let mut cache = DevCache::open_file(tmp.path()).expect("open");
        assert_eq!(cache.devices().len(), 2);
        cache.gc();
        assert_eq!(cache.devices().len(), 1);
        assert!(cache.is_dirty());
    }

    #[test]
    fn probe_device_refreshes_entries() {
        // A probeable image with an ext4 superblock.
        let mut image = vec![0_u8; 4 << 20];
        image[1024..1028].copy_from_slice(&1024_u32.to_le_bytes());
        image[1028..1032].copy_from_slice(&4096_u32.to_le_bytes());
        image[1024 + 0x38] = 0x53;
        image[1024 + 0x39] = 0xEF;
        let mut img = tempfile::NamedTempFile::new().expect("image");
        img.write_all(&image).expect("write image");

        let dir = tempfile::tempdir().expect("tempdir");
        let mut cache = DevCache::open_file(dir.path().join("bdev.tab")).expect("open");
        let found = cache
            .probe_device(&img.path().to_string_lossy())
            .expect("probe");
        assert!(found);
        let dev = cache
            .lookup_device(&img.path().to_string_lossy())
            .expect("entry");
        assert_eq!(dev.tag("TYPE"), Some("ext4"));
        assert!(dev.time > 0.0);
        assert!(cache.is_dirty());

        cache.save().expect("save");
        let reread = DevCache::open_file(dir.path().join("bdev.tab")).expect("reopen");
        assert_eq!(reread.devices().len(), 1);
    }
}
