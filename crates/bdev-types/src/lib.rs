#![forbid(unsafe_code)]
//! Shared primitive types: `NAME=value` tag grammar, device numbers and
//! little-endian slice readers used by the on-disk probers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default logical sector size assumed when the device cannot be asked.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid tag specification: {0}")]
    InvalidTagSpec(String),
    #[error("invalid device number: {0}")]
    InvalidDevno(String),
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
}

// ── Tag grammar ─────────────────────────────────────────────────────────────

/// A parsed `NAME=value` device specification such as `LABEL=boot` or
/// `UUID="6c96:\"x\""`.
///
/// The grammar is strict: the tag name is a non-empty uppercase ASCII
/// identifier (`A`-`Z`, `0`-`9`, `_`, starting with a letter); the value may
/// be wrapped in double quotes, and backslash escapes are honoured only
/// inside quotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    pub value: String,
}

impl TagSpec {
    /// Parse a `NAME=value` string. Returns an error when the input does not
    /// follow the tag grammar, which callers use to fall back to treating
    /// the input as a plain path.
    pub fn parse(spec: &str) -> Result<Self, TypesError> {
        let bad = || TypesError::InvalidTagSpec(spec.to_owned());

        let (name, raw) = spec.split_once('=').ok_or_else(bad)?;
        if !is_valid_tag_name(name) {
            return Err(bad());
        }

        let value = if let Some(inner) = raw.strip_prefix('"') {
            let inner = inner.strip_suffix('"').ok_or_else(bad)?;
            unescape_quoted(inner).ok_or_else(bad)?
        } else if raw.contains('"') {
            return Err(bad());
        } else {
            raw.to_owned()
        };

        Ok(Self {
            name: name.to_owned(),
            value,
        })
    }
}

impl fmt::Display for TagSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Check the tag-name part of the grammar: non-empty uppercase ASCII
/// identifier starting with a letter.
#[must_use]
pub fn is_valid_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn unescape_quoted(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else if c == '"' {
            return None; // unescaped quote inside the value
        } else {
            out.push(c);
        }
    }
    Some(out)
}

// ── Device numbers ──────────────────────────────────────────────────────────

/// A kernel `dev_t` wrapper with `major:minor` formatting and parsing.
/// The default (zero) value means "no device number".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Devno(pub u64);

impl Devno {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self(libc::makedev(major, minor))
    }

    #[must_use]
    pub fn major(self) -> u32 {
        libc::major(self.0)
    }

    #[must_use]
    pub fn minor(self) -> u32 {
        libc::minor(self.0)
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Parse the `major:minor` form used by mountinfo and the device cache.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let bad = || TypesError::InvalidDevno(s.to_owned());
        let (maj, min) = s.split_once(':').ok_or_else(bad)?;
        let maj: u32 = maj.parse().map_err(|_| bad())?;
        let min: u32 = min.parse().map_err(|_| bad())?;
        Ok(Self::new(maj, min))
    }
}

impl fmt::Display for Devno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

// ── Little-endian slice readers ─────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], TypesError> {
    let end = offset.checked_add(len).ok_or(TypesError::InsufficientData {
        needed: len,
        offset,
        actual: data.len(),
    })?;
    if end > data.len() {
        return Err(TypesError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }
    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, TypesError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, TypesError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, TypesError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], TypesError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// CRC-32 (IEEE 802.3, reflected 0xEDB88320 polynomial) as used by the GPT
/// header and partition-entry array checksums.
#[must_use]
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc = !0_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// CRC-32C (Castagnoli, reflected 0x82F63B78 polynomial) as used by btrfs
/// and ext4 metadata checksums.
#[must_use]
pub fn crc32c(data: &[u8]) -> u32 {
    let mut crc = !0_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0x82F6_3B78 & mask);
        }
    }
    !crc
}

/// Interpret a NUL-padded byte field as a trimmed string (labels, volume
/// names).
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// Render a 16-byte DCE UUID in the canonical 36-character form.
#[must_use]
pub fn format_uuid(uuid: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        uuid[0], uuid[1], uuid[2], uuid[3],
        uuid[4], uuid[5],
        uuid[6], uuid[7],
        uuid[8], uuid[9],
        uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
    )
}

/// True when every byte of the (arbitrary-length) UUID field is zero.
#[must_use]
pub fn uuid_is_empty(buf: &[u8]) -> bool {
    buf.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_spec_plain() {
        let t = TagSpec::parse("LABEL=boot").expect("plain tag");
        assert_eq!(t.name, "LABEL");
        assert_eq!(t.value, "boot");
    }

    #[test]
    fn tag_spec_quoted_with_escapes() {
        let t = TagSpec::parse(r#"UUID="a\"b\\c""#).expect("quoted tag");
        assert_eq!(t.name, "UUID");
        assert_eq!(t.value, r#"a"b\c"#);
    }

    #[test]
    fn tag_spec_rejects_bad_names() {
        assert!(TagSpec::parse("label=boot").is_err());
        assert!(TagSpec::parse("=boot").is_err());
        assert!(TagSpec::parse("9LABEL=boot").is_err());
        assert!(TagSpec::parse("/dev/sda1").is_err());
        // Escapes are only honoured inside quotes.
        assert!(TagSpec::parse(r#"LABEL=a"b"#).is_err());
        assert!(TagSpec::parse(r#"LABEL="unterminated"#).is_err());
    }

    #[test]
    fn tag_spec_empty_value_is_allowed() {
        let t = TagSpec::parse("PARTUUID=").expect("empty value");
        assert_eq!(t.value, "");
        let t = TagSpec::parse(r#"LABEL="""#).expect("empty quoted value");
        assert_eq!(t.value, "");
    }

    #[test]
    fn devno_round_trip() {
        let d = Devno::new(8, 17);
        assert_eq!(d.major(), 8);
        assert_eq!(d.minor(), 17);
        assert_eq!(d.to_string(), "8:17");
        assert_eq!(Devno::parse("8:17").expect("parse"), d);
        assert!(Devno::parse("8").is_err());
        assert!(Devno::parse("a:b").is_err());
    }

    #[test]
    fn read_helpers() {
        let bytes = [0x34_u8, 0x12, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0x1234);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_1234);
        assert!(read_le_u64(&bytes, 4).is_err());
    }

    #[test]
    fn uuid_formatting() {
        let uuid = [
            0x6c, 0x96, 0x21, 0x4b, 0xa5, 0x2f, 0x4f, 0x0e, 0x92, 0x1d, 0x0a, 0x1b, 0x2c, 0x3d,
            0x4e, 0x5f,
        ];
        assert_eq!(format_uuid(&uuid), "6c96214b-a52f-4f0e-921d-0a1b2c3d4e5f");
        assert!(!uuid_is_empty(&uuid));
        assert!(uuid_is_empty(&[0_u8; 16]));
    }

    #[test]
    fn crc32_known_vectors() {
        // Standard check value for the IEEE polynomial.
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_ieee(b""), 0);
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
        assert_eq!(crc32c(b""), 0);
    }

    #[test]
    fn nul_padded_labels() {
        assert_eq!(trim_nul_padded(b"boot\0\0\0\0"), "boot");
        assert_eq!(trim_nul_padded(b"  x \0junk"), "x");
        assert_eq!(trim_nul_padded(b"\0"), "");
    }
}
