//! Byte-range buffer cache backing the prober.
//!
//! The prober reads the begin and end of the device heavily, so misses near
//! the edges are serviced by large chunks (2 MiB head and tail windows) and
//! random accesses in the middle by ≥1 MiB page-aligned windows. Character
//! devices get exact-length reads. Cached ranges are never split, merged or
//! evicted during a probe; the whole cache is dropped on device change,
//! window change or step-back.

use bdev_error::Result;
use std::fs::File;
use std::os::unix::fs::FileExt;
use tracing::{debug, trace};

/// Head-of-device chunk size.
const CHUNK_BEGIN: u64 = 2 * 1024 * 1024;
/// Tail-of-device chunk size.
const CHUNK_END: u64 = 2 * 1024 * 1024;
/// Minimum mid-device chunk size.
const CHUNK_MID: u64 = 1024 * 1024;
/// Chunk alignment granularity.
const CHUNK_ALIGN: u64 = 4096;

#[derive(Debug)]
struct Buffer {
    off: u64,
    data: Vec<u8>,
}

impl Buffer {
    fn contains(&self, real_off: u64, len: u64) -> bool {
        real_off >= self.off && real_off + len <= self.off + self.data.len() as u64
    }
}

/// Ordered list of cached byte ranges, keyed by real device offsets.
#[derive(Debug, Default)]
pub(crate) struct BufferCache {
    bufs: Vec<Buffer>,
}

impl BufferCache {
    /// Fetch `len` bytes at the real device offset `real_off`.
    ///
    /// The caller has already validated the request against the probing
    /// window `(win_off, win_size)`; the window is only used here to bound
    /// chunk allocation.
    pub(crate) fn get(
        &mut self,
        file: &File,
        char_dev: bool,
        win_off: u64,
        win_size: u64,
        real_off: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        if let Some(buf) = self.bufs.iter().find(|b| b.contains(real_off, len)) {
            trace!(
                target: "bdev::probe::buffer",
                off = buf.off,
                len = buf.data.len(),
                req_off = real_off,
                req_len = len,
                "reuse buffer"
            );
            return Ok(slice_of(buf, real_off, len));
        }

        let (map_off, map_len) = if char_dev {
            (real_off, len)
        } else {
            chunk_geometry(win_off, win_size, real_off, len)
        };
        debug_assert!(map_off <= real_off);
        debug_assert!(map_off + map_len >= real_off + len);

        #[expect(clippy::cast_possible_truncation)] // chunks are at most 2 MiB
        let mut data = vec![0_u8; map_len as usize];
        file.read_exact_at(&mut data, map_off)?;
        trace!(
            target: "bdev::probe::buffer",
            off = map_off,
            len = map_len,
            "read buffer"
        );

        self.bufs.push(Buffer { off: map_off, data });
        let buf = self.bufs.last().expect("just pushed");
        Ok(slice_of(buf, real_off, len))
    }

    /// Drop every cached range.
    pub(crate) fn reset(&mut self) {
        if !self.bufs.is_empty() {
            let total: u64 = self.bufs.iter().map(|b| b.data.len() as u64).sum();
            debug!(
                target: "bdev::probe::buffer",
                buffers = self.bufs.len(),
                bytes = total,
                "resetting probing buffers"
            );
        }
        self.bufs.clear();
    }

    /// `(offset, length)` of every cached range, in order of first use.
    pub(crate) fn ranges(&self) -> Vec<(u64, u64)> {
        self.bufs
            .iter()
            .map(|b| (b.off, b.data.len() as u64))
            .collect()
    }
}

fn slice_of(buf: &Buffer, real_off: u64, len: u64) -> Vec<u8> {
    #[expect(clippy::cast_possible_truncation)] // requests are at most a few KiB
    let start = (real_off - buf.off) as usize;
    #[expect(clippy::cast_possible_truncation)]
    let len = len as usize;
    buf.data[start..start + len].to_vec()
}

fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Pick the chunk to allocate for a miss at `real_off..real_off+len`,
/// bounded by the probing window.
fn chunk_geometry(win_off: u64, win_size: u64, real_off: u64, len: u64) -> (u64, u64) {
    let win_end = win_off + win_size;

    // Begin of the window.
    if real_off + len <= win_off + CHUNK_BEGIN {
        return (win_off, CHUNK_BEGIN.min(win_size));
    }

    // End of the window.
    if win_size > CHUNK_END && real_off > win_end - CHUNK_END {
        let map_off = align_down(win_end - CHUNK_END, CHUNK_ALIGN).max(win_off);
        return (map_off, win_end - map_off);
    }

    // Middle of the window.
    let map_off = align_down(real_off, CHUNK_ALIGN).max(win_off);
    let min_len = real_off + len - map_off;
    let mut map_len = min_len.max(CHUNK_MID);
    if map_off + map_len > win_end {
        map_len = win_end - map_off;
    }
    (map_off, map_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn image(len: usize) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&data).expect("write image");
        let file = tmp.reopen().expect("reopen");
        (tmp, file)
    }

    #[test]
    fn chunk_covers_request() {
        // (win_off, win_size, real_off, len) across head, tail, middle.
        let cases = [
            (0, 16 << 20, 0, 1024),
            (0, 16 << 20, 1024, 1024),
            (0, 16 << 20, (16 << 20) - 4096, 4096),
            (0, 16 << 20, 8 << 20, 1024),
            (4096, 1 << 20, 4096, 512),
            (4096, 1 << 20, 1_000_000, 512),
        ];
        for (wo, ws, ro, len) in cases {
            let (mo, ml) = chunk_geometry(wo, ws, ro, len);
            assert!(mo <= ro, "case {wo}/{ws}/{ro}/{len}");
            assert!(mo + ml >= ro + len, "case {wo}/{ws}/{ro}/{len}");
            assert!(mo >= wo && mo + ml <= wo + ws, "chunk escapes window");
        }
    }

    #[test]
    fn cache_hits_do_not_reread() {
        let (_tmp, file) = image(4 << 20);
        let mut cache = BufferCache::default();

        let a = cache.get(&file, false, 0, 4 << 20, 1024, 1024).expect("a");
        assert_eq!(cache.ranges().len(), 1);

        // A second request inside the cached chunk must not allocate.
        let b = cache.get(&file, false, 0, 4 << 20, 1500, 100).expect("b");
        assert_eq!(cache.ranges().len(), 1);
        assert_eq!(&a[476..576], &b[..]);
    }

    #[test]
    fn returned_range_satisfies_containment() {
        let (_tmp, file) = image(4 << 20);
        let mut cache = BufferCache::default();
        cache
            .get(&file, false, 0, 4 << 20, (3 << 20) + 7, 512)
            .expect("mid read");
        let (off, len) = cache.ranges()[0];
        assert!(off <= (3 << 20) + 7);
        assert!(off + len >= (3 << 20) + 7 + 512);
    }

    #[test]
    fn char_devices_read_exact_lengths() {
        let (_tmp, file) = image(64 * 1024);
        let mut cache = BufferCache::default();
        cache.get(&file, true, 0, 64 * 1024, 512, 1024).expect("chr");
        assert_eq!(cache.ranges(), vec![(512, 1024)]);
    }

    #[test]
    fn reset_drops_everything() {
        let (_tmp, file) = image(1 << 20);
        let mut cache = BufferCache::default();
        cache.get(&file, false, 0, 1 << 20, 0, 1024).expect("read");
        cache.reset();
        assert!(cache.ranges().is_empty());
    }

    #[test]
    fn data_matches_device_content() {
        let (_tmp, file) = image(1 << 20);
        let mut cache = BufferCache::default();
        let got = cache.get(&file, false, 0, 1 << 20, 1000, 16).expect("read");
        let want: Vec<u8> = (1000..1016).map(|i| (i % 251) as u8).collect();
        assert_eq!(got, want);
    }
}
