//! The NAME=value probing result list.
//!
//! One list per prober; every value is tagged with the chain that produced
//! it so a chain can reset its own results without touching the others.

use crate::chain::ChainId;
use std::borrow::Cow;
use std::fmt;

/// A single probing result value.
///
/// String values (`TYPE`, `LABEL`, …) are UTF-8 where possible; binary
/// values (`SBMAGIC`, `UUID_RAW`-style data) preserve their declared length
/// in `data().len()`.
#[derive(Clone, PartialEq, Eq)]
pub struct ProbeValue {
    name: &'static str,
    chain: ChainId,
    data: Vec<u8>,
}

impl ProbeValue {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The value as a string, replacing invalid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

impl fmt::Debug for ProbeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.as_str())
    }
}

/// Ordered list of probing results with at most one value per
/// `(chain, name)` pair.
#[derive(Debug, Default)]
pub(crate) struct ValueList {
    vals: Vec<ProbeValue>,
}

impl ValueList {
    /// Insert or replace the `(chain, name)` value, preserving first-set
    /// ordering for replacements.
    pub(crate) fn set(&mut self, chain: ChainId, name: &'static str, data: Vec<u8>) {
        tracing::debug!(target: "bdev::probe::values", name, chain = chain.name(), "assign value");
        if let Some(v) = self
            .vals
            .iter_mut()
            .find(|v| v.chain == chain && v.name == name)
        {
            v.data = data;
            return;
        }
        self.vals.push(ProbeValue { name, chain, data });
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&ProbeValue> {
        self.vals.iter().find(|v| v.name == name)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ProbeValue> {
        self.vals.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.vals.len()
    }

    /// Drop every value owned by `chain`.
    pub(crate) fn reset_chain(&mut self, chain: ChainId) {
        if self.vals.iter().any(|v| v.chain == chain) {
            tracing::debug!(target: "bdev::probe::values", chain = chain.name(), "resetting chain values");
        }
        self.vals.retain(|v| v.chain != chain);
    }

    /// Move `chain`'s values out of the list, preserving order.
    pub(crate) fn take_chain(&mut self, chain: ChainId) -> Vec<ProbeValue> {
        let mut taken = Vec::new();
        self.vals.retain(|v| {
            if v.chain == chain {
                taken.push(v.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Append previously saved values back onto the list.
    pub(crate) fn append(&mut self, vals: Vec<ProbeValue>) {
        self.vals.extend(vals);
    }

    pub(crate) fn reset(&mut self) {
        self.vals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_same_chain_and_name() {
        let mut list = ValueList::default();
        list.set(ChainId::Superblocks, "TYPE", b"ext4".to_vec());
        list.set(ChainId::Superblocks, "TYPE", b"xfs".to_vec());
        assert_eq!(list.len(), 1);
        assert_eq!(list.lookup("TYPE").expect("TYPE").as_str(), "xfs");
    }

    #[test]
    fn reset_chain_is_selective() {
        let mut list = ValueList::default();
        list.set(ChainId::Superblocks, "TYPE", b"ext4".to_vec());
        list.set(ChainId::Partitions, "PTTYPE", b"dos".to_vec());
        list.reset_chain(ChainId::Superblocks);
        assert_eq!(list.len(), 1);
        assert!(list.lookup("TYPE").is_none());
        assert!(list.lookup("PTTYPE").is_some());
    }

    #[test]
    fn take_and_append_round_trip_preserves_order() {
        let mut list = ValueList::default();
        list.set(ChainId::Superblocks, "TYPE", b"ext4".to_vec());
        list.set(ChainId::Superblocks, "UUID", b"u".to_vec());
        list.set(ChainId::Partitions, "PTTYPE", b"dos".to_vec());

        let saved = list.take_chain(ChainId::Superblocks);
        assert_eq!(saved.len(), 2);
        assert_eq!(list.len(), 1);

        list.append(saved);
        let names: Vec<_> = list.iter().map(ProbeValue::name).collect();
        assert_eq!(names, vec!["PTTYPE", "TYPE", "UUID"]);
    }
}
