//! Snapshots: the self-contained dump/restore format for engine state.
//!
//! A snapshot carries everything a replica needs to come back to life:
//! schema, identity, clock, all records (tombstones included), and the
//! pending log. Serialization is canonical: maps are sorted and struct
//! fields are declared so their serialized names ascend, which makes
//! byte-equal encodings of equal states possible.

use crate::{
    error::Result, CollectionName, Error, HybridClock, NodeId, PendingEntry, Record, RecordId,
    Schema,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time dump of one engine's entire state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Clock at export time.
    pub clock: HybridClock,
    /// Snapshot format version, checked on import.
    pub format_version: u32,
    /// Owning replica.
    pub node_id: NodeId,
    /// Pending log entries in their original order.
    pub pending: Vec<PendingEntry>,
    /// All records by collection, then record id.
    pub records: BTreeMap<CollectionName, BTreeMap<RecordId, Record>>,
    /// The schema in force at export time.
    pub schema: Schema,
}

impl Snapshot {
    /// An empty snapshot for a replica.
    pub fn empty(schema: Schema, node_id: impl Into<NodeId>) -> Self {
        let node_id = node_id.into();
        Self {
            clock: HybridClock::new(node_id.clone()),
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id,
            pending: Vec::new(),
            records: BTreeMap::new(),
            schema,
        }
    }

    /// Look up a record.
    pub fn record(&self, collection: &str, id: &str) -> Option<&Record> {
        self.records.get(collection)?.get(id)
    }

    /// Total record count, tombstones included.
    pub fn record_count(&self) -> usize {
        self.records.values().map(|c| c.len()).sum()
    }

    /// Count of live (non-deleted) records.
    pub fn live_record_count(&self) -> usize {
        self.records
            .values()
            .flat_map(|c| c.values())
            .filter(|r| !r.deleted)
            .count()
    }

    /// Canonical JSON encoding.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Pretty-printed JSON, for debugging.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Decode from JSON. Format compatibility is checked on import, not here.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Malformed(e.to_string()))
    }
}
