//! Hybrid logical clock.
//!
//! Every replica carries one clock. It advances on local emission and on
//! observation of remote operations, and its total order is the backbone of
//! deterministic conflict resolution.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A hybrid logical clock value: a counter paired with the owning node id.
///
/// Clocks compare by counter first, then by node id lexicographically, which
/// yields a total order across all replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridClock {
    /// Monotonically increasing counter.
    pub counter: u64,
    /// Identifier of the replica that owns this clock.
    pub node_id: NodeId,
}

impl HybridClock {
    /// A fresh clock for a replica, starting at counter 0.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            counter: 0,
            node_id: node_id.into(),
        }
    }

    /// A clock at a specific counter value.
    pub fn at(node_id: impl Into<NodeId>, counter: u64) -> Self {
        Self {
            counter,
            node_id: node_id.into(),
        }
    }

    /// Advance for a local event and return the new value.
    ///
    /// Invoked exactly once before emitting a local operation.
    pub fn tick(&mut self) -> HybridClock {
        self.counter += 1;
        self.clone()
    }

    /// Fold in a clock received from a peer and return the new value.
    ///
    /// Sets the counter to `max(self, incoming) + 1`; the node id never
    /// changes. Invoked before applying any remote operation.
    pub fn observe(&mut self, incoming: &HybridClock) -> HybridClock {
        self.counter = self.counter.max(incoming.counter) + 1;
        self.clone()
    }

    /// Raise the counter to at least `incoming`'s without incrementing.
    ///
    /// Used when a locally issued operation is applied: the host already
    /// ticked for it, so the engine only needs to keep dominance.
    pub fn catch_up(&mut self, incoming: &HybridClock) {
        if incoming.counter > self.counter {
            self.counter = incoming.counter;
        }
    }

    /// True when this clock is strictly below `other` in the total order.
    pub fn happened_before(&self, other: &HybridClock) -> bool {
        self < other
    }

    /// True when two clocks share a counter but belong to different replicas.
    pub fn is_concurrent_with(&self, other: &HybridClock) -> bool {
        self.counter == other.counter && self.node_id != other.node_id
    }
}

impl Ord for HybridClock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for HybridClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
