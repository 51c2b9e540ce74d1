//! This module contains the tracking of the persistent and static locations a
//! path through the script reads and writes.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::vm::{
    state::{slot::SlotKind, AnalysisState},
    value::StackItem,
};

/// A location whose accesses the analysis tracks.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Access {
    /// A slot entry of the given kind.
    Slot { kind: SlotKind, index: usize },

    /// A storage cell, keyed by the (possibly symbolic) key item.
    Storage { key: StackItem },
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slot { kind, index } => write!(f, "{kind}[{index}]"),
            Self::Storage { key } => write!(f, "storage[{key}]"),
        }
    }
}

/// The reads and writes observed during one run of the interpreter.
///
/// A read is recorded only if its location has not been written earlier in the
/// run, as such a read observes the written value rather than prior state.
/// Each map takes a location to the offset of the instruction that first read
/// it or last wrote it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessTracker {
    reads:  BTreeMap<Access, u32>,
    writes: BTreeMap<Access, u32>,
}

impl AccessTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read of `access` by the instruction at `offset`, returning
    /// `true` if it was a read of prior state.
    pub fn record_read(&mut self, access: Access, offset: u32) -> bool {
        if self.writes.contains_key(&access) {
            return false;
        }
        self.reads.entry(access).or_insert(offset);
        true
    }

    /// Records a write of `access` by the instruction at `offset`.
    pub fn record_write(&mut self, access: Access, offset: u32) {
        self.writes.insert(access, offset);
    }

    /// Checks if `access` has been written during the run.
    #[must_use]
    pub fn written(&self, access: &Access) -> bool {
        self.writes.contains_key(access)
    }

    #[must_use]
    pub fn reads(&self) -> &BTreeMap<Access, u32> {
        &self.reads
    }

    #[must_use]
    pub fn writes(&self) -> &BTreeMap<Access, u32> {
        &self.writes
    }

    /// Gets the locations read before being written, in sorted order.
    #[must_use]
    pub fn read_set(&self) -> Vec<Access> {
        self.reads.keys().cloned().collect()
    }

    /// Gets the locations written, in sorted order.
    #[must_use]
    pub fn write_set(&self) -> Vec<Access> {
        self.writes.keys().cloned().collect()
    }
}

impl AnalysisState for AccessTracker {}

#[cfg(test)]
mod test {
    use crate::vm::{
        state::{
            slot::SlotKind,
            tracking::{Access, AccessTracker},
        },
        value::StackItem,
    };

    fn static_field(index: usize) -> Access {
        Access::Slot {
            kind: SlotKind::Static,
            index,
        }
    }

    #[test]
    fn reads_after_writes_are_not_recorded() {
        let mut tracker = AccessTracker::new();
        assert!(tracker.record_read(static_field(0), 1));
        tracker.record_write(static_field(1), 2);
        assert!(!tracker.record_read(static_field(1), 3));

        assert_eq!(tracker.read_set(), vec![static_field(0)]);
        assert_eq!(tracker.write_set(), vec![static_field(1)]);
        assert!(tracker.written(&static_field(1)));
    }

    #[test]
    fn keeps_the_first_read_and_last_write() {
        let mut tracker = AccessTracker::new();
        let key = Access::Storage {
            key: StackItem::bytes(vec![0x01]),
        };
        tracker.record_read(key.clone(), 4);
        tracker.record_read(key.clone(), 9);
        tracker.record_write(key.clone(), 10);
        tracker.record_write(key.clone(), 12);

        assert_eq!(tracker.reads().get(&key), Some(&4));
        assert_eq!(tracker.writes().get(&key), Some(&12));
        assert_eq!(key.to_string(), "storage[0x01]");
    }
}
