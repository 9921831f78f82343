//! Mount option-string helpers.
//!
//! Option strings are comma-separated `name` or `name=value` items; lookup
//! must not confuse `subvol` with `subvolid`.

/// Look up `name` in a comma-separated option string.
///
/// Returns `None` when absent, `Some(None)` for a bare flag and
/// `Some(Some(value))` for `name=value`.
#[must_use]
pub fn get_option(optstr: &str, name: &str) -> Option<Option<String>> {
    for item in optstr.split(',') {
        match item.split_once('=') {
            Some((n, v)) if n == name => return Some(Some(v.to_owned())),
            None if item == name => return Some(None),
            _ => {}
        }
    }
    None
}

/// True when the option is present (with or without a value).
#[must_use]
pub fn has_option(optstr: &str, name: &str) -> bool {
    get_option(optstr, name).is_some()
}

/// Merge VFS and FS option strings the way mtab shows them.
#[must_use]
pub fn merge_options(vfs: Option<&str>, fs: Option<&str>) -> Option<String> {
    match (vfs, fs) {
        (None, None) => None,
        (Some(v), None) => Some(v.to_owned()),
        (None, Some(f)) => Some(f.to_owned()),
        (Some(v), Some(f)) => Some(format!("{v},{f}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_name_match_only() {
        let opts = "rw,subvolid=256,subvol=/data,noatime";
        assert_eq!(get_option(opts, "subvol"), Some(Some("/data".to_owned())));
        assert_eq!(get_option(opts, "subvolid"), Some(Some("256".to_owned())));
        assert_eq!(get_option(opts, "rw"), Some(None));
        assert_eq!(get_option(opts, "sub"), None);
        assert_eq!(get_option(opts, "atime"), None);
    }

    #[test]
    fn empty_values_are_preserved() {
        assert_eq!(get_option("offset=", "offset"), Some(Some(String::new())));
    }

    #[test]
    fn merge_keeps_vfs_first() {
        assert_eq!(
            merge_options(Some("rw,noatime"), Some("data=ordered")).as_deref(),
            Some("rw,noatime,data=ordered")
        );
        assert_eq!(merge_options(None, Some("x")).as_deref(), Some("x"));
        assert_eq!(merge_options(None, None), None);
    }
}
