//! Configuration snapshot.
//!
//! The configuration file is a flat `KEY=value` list. A snapshot is
//! immutable once read; re-reading produces a new snapshot. Probers and the
//! device cache hold `Arc` references.

use bdev_error::{BdevError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming an alternative configuration file.
pub const ENV_CONFIG_FILE: &str = "BDEV_CONF";
/// Environment variable naming an alternative cache file.
pub const ENV_CACHE_FILE: &str = "BDEV_CACHE_FILE";

const DEFAULT_CONFIG_FILE: &str = "/etc/bdev/bdev.conf";
const RUNTIME_TOPDIR: &str = "/run";
const CACHE_FILE_RUNTIME: &str = "/run/bdev/bdev.tab";
const CACHE_FILE_OLD: &str = "/etc/bdev.tab";

/// Tag evaluation methods, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMethod {
    /// Resolve tags through udev-maintained symlinks.
    Udev,
    /// Resolve tags by scanning devices.
    Scan,
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_file: PathBuf,
    pub eval: Vec<EvalMethod>,
    pub send_uevent: bool,
    /// Signature names never probed (applied as a not-in superblocks
    /// filter).
    pub probe_off: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
            eval: vec![EvalMethod::Udev, EvalMethod::Scan],
            send_uevent: true,
            probe_off: Vec::new(),
        }
    }
}

/// Default cache path: under `/run` when it exists, the legacy `/etc`
/// location otherwise. `BDEV_CACHE_FILE` overrides both.
#[must_use]
pub fn default_cache_file() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_CACHE_FILE) {
        return PathBuf::from(path);
    }
    if Path::new(RUNTIME_TOPDIR).is_dir() {
        PathBuf::from(CACHE_FILE_RUNTIME)
    } else {
        PathBuf::from(CACHE_FILE_OLD)
    }
}

impl Config {
    /// Read the configuration file named by `BDEV_CONF` (default
    /// `/etc/bdev/bdev.conf`). A missing file yields the built-in defaults;
    /// a malformed file is a parse error.
    pub fn read() -> Result<Arc<Self>> {
        let filename = std::env::var(ENV_CONFIG_FILE)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::read_file(&filename)
    }

    /// Read a specific configuration file.
    pub fn read_file(filename: &Path) -> Result<Arc<Self>> {
        debug!(target: "bdev::probe::config", file = %filename.display(), "reading config");

        let text = match std::fs::read_to_string(filename) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(target: "bdev::probe::config", "config missing, using built-in defaults");
                return Ok(Arc::new(Self::default()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut conf = Self {
            eval: Vec::new(),
            ..Self::default()
        };

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            conf.parse_line(line).map_err(|detail| BdevError::Parse {
                file: filename.display().to_string(),
                line: lineno + 1,
                detail,
            })?;
        }

        if conf.eval.is_empty() {
            conf.eval = vec![EvalMethod::Udev, EvalMethod::Scan];
        }
        Ok(Arc::new(conf))
    }

    fn parse_line(&mut self, line: &str) -> std::result::Result<(), String> {
        if let Some(value) = line.strip_prefix("SEND_UEVENT=") {
            self.send_uevent = value.eq_ignore_ascii_case("yes");
        } else if let Some(value) = line.strip_prefix("CACHE_FILE=") {
            if !value.is_empty() {
                self.cache_file = PathBuf::from(value);
            }
        } else if let Some(value) = line.strip_prefix("EVALUATE=") {
            for method in value.split(',').filter(|m| !m.is_empty()) {
                match method {
                    "udev" => self.eval.push(EvalMethod::Udev),
                    "scan" => self.eval.push(EvalMethod::Scan),
                    other => return Err(format!("unknown evaluation method '{other}'")),
                }
            }
        } else if let Some(value) = line.strip_prefix("PROBE_OFF=") {
            self.probe_off = value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        } else {
            return Err(format!("unknown option '{line}'"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(text: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(text.as_bytes()).expect("write");
        tmp
    }

    #[test]
    fn missing_file_gives_defaults() {
        let conf = Config::read_file(Path::new("/nonexistent/bdev.conf")).expect("defaults");
        assert_eq!(conf.eval, vec![EvalMethod::Udev, EvalMethod::Scan]);
        assert!(conf.send_uevent);
        assert!(conf.probe_off.is_empty());
    }

    #[test]
    fn parses_all_recognized_keys() {
        let tmp = write_conf(
            "# comment\n\
             \n\
             SEND_UEVENT=no\n\
             CACHE_FILE=/tmp/x.tab\n\
             EVALUATE=scan\n\
             PROBE_OFF=vfat,swap\n",
        );
        let conf = Config::read_file(tmp.path()).expect("parse");
        assert!(!conf.send_uevent);
        assert_eq!(conf.cache_file, PathBuf::from("/tmp/x.tab"));
        assert_eq!(conf.eval, vec![EvalMethod::Scan]);
        assert_eq!(conf.probe_off, vec!["vfat", "swap"]);
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let tmp = write_conf("NO_SUCH_KEY=1\n");
        let err = Config::read_file(tmp.path()).expect_err("parse error");
        assert!(matches!(err, BdevError::Parse { line: 1, .. }));
    }

    #[test]
    fn unknown_eval_method_is_a_parse_error() {
        let tmp = write_conf("EVALUATE=udev,bogus\n");
        assert!(Config::read_file(tmp.path()).is_err());
    }
}
