//! The chain-driver contract and per-chain state.
//!
//! Probing routines are grouped into three fixed chains: superblocks,
//! topology and partitions. A chain's integer ID must equal its position in
//! the chain array — `do_probe`'s chain-advance logic indexes the array by
//! ID, so the enum discriminants below are load-bearing.

use crate::magic::{IdMag, MagicHit};
use crate::{ProbeOutcome, Prober};
use bdev_error::Result;
use serde::Serialize;

/// Number of chains. Fixed; the chain set is not user-extensible.
pub const NCHAINS: usize = 3;

/// Identity of a probing chain. Discriminants are array positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(usize)]
pub enum ChainId {
    Superblocks = 0,
    Topology = 1,
    Partitions = 2,
}

impl ChainId {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Superblocks => "superblocks",
            Self::Topology => "topology",
            Self::Partitions => "partitions",
        }
    }

    #[must_use]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Self::Superblocks),
            1 => Some(Self::Topology),
            2 => Some(Self::Partitions),
            _ => None,
        }
    }

    pub(crate) fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub(crate) fn prev(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }
}

/// Usage class of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Usage {
    Filesystem,
    Raid,
    Crypto,
    Other,
}

impl Usage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Raid => "raid",
            Self::Crypto => "crypto",
            Self::Other => "other",
        }
    }
}

/// Probe callback of a descriptor. Receives the matched magic (if the
/// descriptor declares magics) and reports whether the signature is really
/// present, setting values on the prober as a side effect.
pub(crate) type ProbeFn = fn(&mut Prober, Option<&MagicHit>) -> Result<ProbeOutcome>;

/// One signature recognizer within a chain.
pub(crate) struct IdInfo {
    pub name: &'static str,
    pub usage: Usage,
    /// A tolerant signature can legitimately coexist with another one on the
    /// same device; safeprobe does not count it as ambivalence.
    pub tolerant: bool,
    /// Minimum device size for this signature to be possible.
    pub minsz: Option<u64>,
    pub magics: &'static [IdMag],
    pub probe_fn: ProbeFn,
}

/// Per-chain mutable state owned by a prober.
#[derive(Debug)]
pub(crate) struct ChainState {
    pub enabled: bool,
    pub flags: u32,
    /// One bit per descriptor; a set bit means "skip".
    pub filter: Option<Vec<u8>>,
    /// Current descriptor index; `None` is the pre-start sentinel.
    pub idx: Option<usize>,
}

impl ChainState {
    pub(crate) fn new(enabled: bool, flags: u32) -> Self {
        Self {
            enabled,
            flags,
            filter: None,
            idx: None,
        }
    }

    pub(crate) fn reset_position(&mut self) {
        self.idx = None;
    }

    pub(crate) fn is_filtered(&self, idx: usize) -> bool {
        self.filter
            .as_ref()
            .is_some_and(|bmp| bitmap_get(bmp, idx))
    }
}

/// Filter polarity for `filter_*_type` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFlag {
    /// Probe only for the named types.
    OnlyIn,
    /// Probe for everything except the named types.
    NotIn,
}

/// The contract every chain implements.
pub(crate) trait ChainDriver: Sync {
    fn id(&self) -> ChainId;
    fn default_enabled(&self) -> bool;
    fn default_flags(&self) -> u32;
    fn supports_filter(&self) -> bool;
    fn idinfos(&self) -> &'static [&'static IdInfo];

    /// Advance the chain one descriptor forward, attempting matches.
    fn probe(&self, pr: &mut Prober) -> Result<ProbeOutcome>;

    /// Examine the whole chain; error with `Ambivalent` when two or more
    /// intolerant signatures match.
    fn safeprobe(&self, pr: &mut Prober) -> Result<ProbeOutcome>;
}

// ── Filter bitmaps ──────────────────────────────────────────────────────────

pub(crate) fn bitmap_nbytes(nbits: usize) -> usize {
    nbits.div_ceil(8)
}

pub(crate) fn bitmap_get(bitmap: &[u8], idx: usize) -> bool {
    let byte = idx / 8;
    byte < bitmap.len() && (bitmap[byte] >> (idx % 8)) & 1 == 1
}

pub(crate) fn bitmap_set(bitmap: &mut [u8], idx: usize) {
    let byte = idx / 8;
    if byte < bitmap.len() {
        bitmap[byte] |= 1 << (idx % 8);
    }
}

pub(crate) fn bitmap_invert(bitmap: &mut [u8]) {
    for b in bitmap {
        *b = !*b;
    }
}
