//! The pending log: locally applied operations awaiting acknowledgement.

use crate::{OpId, Operation, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One entry in the pending log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    /// Host wall-clock milliseconds when the operation was applied locally.
    pub applied_at: TimeMs,
    /// The operation itself, by value.
    pub operation: Operation,
}

/// FIFO log of locally originated operations not yet acknowledged by a peer.
///
/// Entries leave the log in exactly two ways: acknowledgement, or losing a
/// conflict during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingLog {
    entries: Vec<PendingEntry>,
}

impl PendingLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from snapshot entries, preserving their order.
    pub fn from_entries(entries: Vec<PendingEntry>) -> Self {
        Self { entries }
    }

    /// Append an operation at the tail.
    pub fn push(&mut self, operation: Operation, applied_at: TimeMs) {
        self.entries.push(PendingEntry {
            applied_at,
            operation,
        });
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    /// Iterator over the pending operation ids, oldest first.
    pub fn op_ids(&self) -> impl Iterator<Item = &OpId> {
        self.entries.iter().map(|e| e.operation.op_id())
    }

    /// True when the given operation id is pending.
    pub fn contains(&self, op_id: &str) -> bool {
        self.entries.iter().any(|e| e.operation.op_id() == op_id)
    }

    /// The most recent pending entry targeting a record, if any.
    pub fn latest_for(&self, collection: &str, record_id: &str) -> Option<&PendingEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.operation.collection() == collection && e.operation.record_id() == record_id)
    }

    /// Drop entries whose op ids appear in `op_ids`; unknown ids are ignored.
    ///
    /// Returns how many entries were removed.
    pub fn acknowledge(&mut self, op_ids: &[OpId]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !op_ids.iter().any(|id| id == e.operation.op_id()));
        before - self.entries.len()
    }

    /// Drop entries whose op ids appear in `op_ids`.
    pub fn remove(&mut self, op_ids: &HashSet<OpId>) {
        self.entries
            .retain(|e| !op_ids.contains(e.operation.op_id()));
    }
}
