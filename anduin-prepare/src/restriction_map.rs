//! Turn-restriction index keyed by the (from, via) node pair.

use anduin_graph::{NodeId, TurnRestriction};
use std::collections::HashMap;

/// Buckets of `(to, is_only)` entries per (from, via) pair.
///
/// An `is_only` entry is exclusive: once present it is the bucket's single
/// entry, and later restrictions for the same pair are silently ignored.
/// Inserting an `is_only` entry into a bucket of ordinary restrictions
/// evicts them. This mirrors the data this engine was built against, where
/// conflicting restriction input is resolved in favor of the mandatory
/// turn.
#[derive(Default)]
pub struct RestrictionMap {
    index: HashMap<(NodeId, NodeId), usize>,
    buckets: Vec<Vec<(NodeId, bool)>>,
    count: u32,
}

impl RestrictionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, restriction: &TurnRestriction) {
        let key = (restriction.from, restriction.via);
        let index = match self.index.get(&key) {
            Some(&index) => {
                // A mandatory turn owns its bucket.
                if self.buckets[index].first().is_some_and(|entry| entry.1) {
                    return;
                }
                if restriction.is_only {
                    self.count -= self.buckets[index].len() as u32;
                    self.buckets[index].clear();
                }
                index
            }
            None => {
                let index = self.buckets.len();
                self.buckets.push(Vec::new());
                self.index.insert(key, index);
                index
            }
        };
        self.count += 1;
        self.buckets[index].push((restriction.to, restriction.is_only));
    }

    /// Number of restriction entries currently held.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// If (from, via) carries a mandatory turn, its target.
    pub fn only_target(&self, from: NodeId, via: NodeId) -> Option<NodeId> {
        let bucket = &self.buckets[*self.index.get(&(from, via))?];
        bucket
            .iter()
            .find(|(_, is_only)| *is_only)
            .map(|&(to, _)| to)
    }

    /// Whether the turn from→via→to is forbidden by an ordinary restriction.
    pub fn is_forbidden(&self, from: NodeId, via: NodeId, to: NodeId) -> bool {
        self.index
            .get(&(from, via))
            .is_some_and(|&index| self.buckets[index].iter().any(|&(target, _)| target == to))
    }

    #[cfg(test)]
    fn bucket(&self, from: NodeId, via: NodeId) -> Option<&[(NodeId, bool)]> {
        self.index
            .get(&(from, via))
            .map(|&index| self.buckets[index].as_slice())
    }
}
