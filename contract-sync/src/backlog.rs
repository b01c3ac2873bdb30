//! Irreversible notifications received ahead of the cursor

use std::collections::BTreeMap;

use crate::primitives::BlockTopology;

/// Irreversible topologies keyed by height, at most one per height
#[derive(Debug, Default)]
pub struct Backlog {
    entries: BTreeMap<u64, BlockTopology>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues `topology`, returning the entry it replaced at the same height.
    pub fn insert(&mut self, topology: BlockTopology) -> Option<BlockTopology> {
        self.entries.insert(topology.height, topology)
    }

    /// Lowest queued entry
    pub fn first(&self) -> Option<&BlockTopology> {
        self.entries.values().next()
    }

    pub fn remove(&mut self, height: u64) -> Option<BlockTopology> {
        self.entries.remove(&height)
    }

    /// Removes every entry at or below `height`, ascending.
    pub fn drain_at_or_below(&mut self, height: u64) -> Vec<BlockTopology> {
        let above = match height.checked_add(1) {
            Some(next) => self.entries.split_off(&next),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.entries, above)
            .into_values()
            .collect()
    }

    pub fn heights(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }
}
