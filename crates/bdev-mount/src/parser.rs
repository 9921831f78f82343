//! Parsers for the two mount-table dialects.
//!
//! fstab/mtab: six whitespace-separated columns with octal escapes for
//! spaces, tabs and backslashes. mountinfo: `id parent maj:min root target
//! vfs-opts [optional…] - fstype source fs-opts`.

use crate::FsEntry;
use bdev_error::{BdevError, Result};
use bdev_types::Devno;

/// Decode the `\040`-style octal escapes of fstab and mountinfo fields.
#[must_use]
pub fn unmangle(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let val = (oct[0] - b'0') * 64 + (oct[1] - b'0') * 8 + (oct[2] - b'0');
                out.push(val);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_error(detail: impl Into<String>) -> BdevError {
    BdevError::Parse {
        file: String::new(),
        line: 0,
        detail: detail.into(),
    }
}

/// Parse one fstab/mtab line (comments and blank lines are the caller's
/// concern).
pub fn parse_fstab_line(line: &str) -> Result<FsEntry> {
    let mut cols = line.split_ascii_whitespace();
    let source = cols.next().ok_or_else(|| parse_error("missing source"))?;
    let target = cols.next().ok_or_else(|| parse_error("missing target"))?;
    let fstype = cols.next().ok_or_else(|| parse_error("missing fs type"))?;
    let options = cols.next().ok_or_else(|| parse_error("missing options"))?;
    let freq = cols.next().map_or(Ok(0), str::parse::<i32>);
    let passno = cols.next().map_or(Ok(0), str::parse::<i32>);
    let (freq, passno) = match (freq, passno) {
        (Ok(f), Ok(p)) => (f, p),
        _ => return Err(parse_error("bad freq/passno")),
    };
    if cols.next().is_some() {
        return Err(parse_error("too many fields"));
    }

    let mut fs = FsEntry::new();
    fs.set_source(unmangle(source));
    fs.set_target(unmangle(target));
    fs.set_fstype(fstype);
    fs.set_options(unmangle(options));
    fs.set_freq(freq);
    fs.set_passno(passno);
    Ok(fs)
}

/// Parse one mountinfo line.
pub fn parse_mountinfo_line(line: &str) -> Result<FsEntry> {
    let (mnt_part, fs_part) = line
        .split_once(" - ")
        .ok_or_else(|| parse_error("missing mountinfo separator"))?;

    let mut cols = mnt_part.split_ascii_whitespace();
    let id: i32 = cols
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_error("bad mount id"))?;
    let parent_id: i32 = cols
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_error("bad parent id"))?;
    let devno = cols
        .next()
        .and_then(|s| Devno::parse(s).ok())
        .ok_or_else(|| parse_error("bad device number"))?;
    let root = cols.next().ok_or_else(|| parse_error("missing fs-root"))?;
    let target = cols.next().ok_or_else(|| parse_error("missing mountpoint"))?;
    let vfs_opts = cols.next().ok_or_else(|| parse_error("missing options"))?;
    let attrs: Vec<&str> = cols.collect();

    let mut fs_cols = fs_part.split_ascii_whitespace();
    let fstype = fs_cols.next().ok_or_else(|| parse_error("missing fs type"))?;
    let source = fs_cols.next().ok_or_else(|| parse_error("missing source"))?;
    let fs_opts = fs_cols.next().ok_or_else(|| parse_error("missing super options"))?;

    let mut fs = FsEntry::new();
    fs.set_kernel(true);
    fs.set_id(id);
    fs.set_parent_id(parent_id);
    fs.set_devno(devno);
    fs.set_root(unmangle(root));
    fs.set_target(unmangle(target));
    fs.set_vfs_options(vfs_opts);
    if !attrs.is_empty() {
        fs.set_attrs(attrs.join(" "));
    }
    fs.set_fstype(unmangle(fstype));
    fs.set_source(unmangle(source));
    fs.set_fs_options(fs_opts);
    Ok(fs)
}

/// Guess the dialect of a single line.
#[must_use]
pub fn looks_like_mountinfo(line: &str) -> bool {
    let mut cols = line.split_ascii_whitespace();
    let first_numeric = cols.next().is_some_and(|c| c.parse::<u32>().is_ok());
    let second_numeric = cols.next().is_some_and(|c| c.parse::<u32>().is_ok());
    first_numeric && second_numeric && line.contains(" - ")
}
