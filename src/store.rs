//! The engine: schema-validated record store, pending log, and lifecycle.
//!
//! An [`Engine`] is one replica. It owns its entire state, performs no IO,
//! and returns in bounded time from every call. Local mutations go through
//! [`Engine::apply`]; remote batches go through [`Engine::reconcile`]
//! (see [`crate::reconcile`]).

use crate::{
    error::Result, pending::PendingLog, snapshot::SNAPSHOT_FORMAT_VERSION, CollectionName, Error,
    HybridClock, NodeId, OpId, Operation, Origin, Record, RecordId, Schema, Snapshot, TimeMs,
    Version,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Result of applying a single operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    /// The applied operation.
    pub op_id: OpId,
    /// The affected record.
    pub record_id: RecordId,
    /// The record's new version.
    pub version: Version,
}

/// Lightweight engine introspection, cheap to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetadata {
    /// Current clock value.
    pub clock: HybridClock,
    /// Replica identifier.
    pub node_id: NodeId,
    /// Operations awaiting acknowledgement.
    pub pending_count: usize,
    /// Records held, tombstones included.
    pub record_count: usize,
}

/// One replica of the sync engine.
pub struct Engine {
    pub(crate) clock: HybridClock,
    /// Side index of every operation this replica has classified, mapping
    /// op id to the record it targeted. Re-delivered ids are duplicates.
    pub(crate) ledger: HashMap<OpId, (CollectionName, RecordId)>,
    pub(crate) node_id: NodeId,
    pub(crate) pending: PendingLog,
    pub(crate) records: BTreeMap<CollectionName, BTreeMap<RecordId, Record>>,
    pub(crate) schema: Schema,
}

impl Engine {
    /// Create an engine for a replica, with empty state.
    pub fn new(schema: Schema, node_id: impl Into<NodeId>) -> Self {
        let node_id = node_id.into();
        let clock = HybridClock::new(node_id.clone());

        let mut records = BTreeMap::new();
        for name in schema.collections.keys() {
            records.insert(name.clone(), BTreeMap::new());
        }

        Self {
            clock,
            ledger: HashMap::new(),
            node_id,
            pending: PendingLog::new(),
            records,
            schema,
        }
    }

    /// The replica identifier.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The current clock value.
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    /// The active schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Advance the clock for a local event and return the new value.
    pub fn tick(&mut self) -> HybridClock {
        self.clock.tick()
    }

    /// Apply a locally issued operation.
    ///
    /// Validates against the schema, enforces existence and `base_version`
    /// rules, mutates the record, and appends the operation to the pending
    /// log. On error nothing is mutated. `now_ms` stamps the pending entry.
    pub fn apply(&mut self, op: Operation, now_ms: TimeMs) -> Result<ApplyResult> {
        self.schema.validate_op(&op)?;

        let collection = op.collection().clone();
        let id = op.record_id().clone();
        let existing = self.records.get(&collection).and_then(|c| c.get(&id));

        match &op {
            Operation::Create { .. } => {
                // A tombstone may be resurrected; a live record may not.
                if existing.is_some_and(|r| !r.deleted) {
                    return Err(Error::AlreadyExists { collection, id });
                }
            }
            Operation::Update { base_version, .. } | Operation::Delete { base_version, .. } => {
                let record = existing.filter(|r| !r.deleted).ok_or_else(|| Error::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
                if record.version != *base_version {
                    return Err(Error::VersionMismatch {
                        expected: *base_version,
                        actual: record.version,
                    });
                }
            }
        }

        // All checks passed; from here the call cannot fail.
        self.clock.catch_up(op.clock());

        let timestamp = op.timestamp();
        let clock = op.clock().clone();
        let bucket = self.records.entry(collection.clone()).or_default();
        let version = match bucket.get_mut(&id) {
            Some(record) => {
                record.supersede(
                    op.payload().cloned(),
                    op.is_delete(),
                    timestamp,
                    clock,
                    Origin::Local,
                );
                if matches!(op, Operation::Create { .. }) {
                    // a resurrecting create establishes creation time anew
                    record.metadata.created_at = timestamp;
                }
                record.version
            }
            None => {
                let record = Record::first(
                    id.clone(),
                    collection.clone(),
                    op.payload().cloned().unwrap_or(serde_json::Value::Null),
                    timestamp,
                    clock,
                    Origin::Local,
                );
                let version = record.version;
                bucket.insert(id.clone(), record);
                version
            }
        };

        let op_id = op.op_id().clone();
        tracing::trace!(
            op_id = %op_id,
            kind = op.kind(),
            collection = %collection,
            record_id = %id,
            version,
            "applied local op"
        );
        self.ledger.insert(op_id.clone(), (collection, id.clone()));
        self.pending.push(op, now_ms);

        Ok(ApplyResult {
            op_id,
            record_id: id,
            version,
        })
    }

    /// Look up a record. Tombstones are returned as well.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Record> {
        self.records.get(collection).and_then(|c| c.get(id))
    }

    /// All records of a collection, ordered by record id ascending.
    ///
    /// Errors with [`Error::UnknownCollection`] when the schema does not
    /// declare the collection.
    pub fn query(&self, collection: &str, include_deleted: bool) -> Result<Vec<&Record>> {
        if self.schema.collection(collection).is_none() {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        Ok(self
            .records
            .get(collection)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|r| include_deleted || !r.deleted)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Records of a collection whose payload matches a predicate,
    /// ordered by record id ascending.
    pub fn select<'a, F>(
        &'a self,
        collection: &str,
        include_deleted: bool,
        predicate: F,
    ) -> Result<impl Iterator<Item = &'a Record>>
    where
        F: Fn(&serde_json::Value) -> bool + 'a,
    {
        if self.schema.collection(collection).is_none() {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        Ok(self
            .records
            .get(collection)
            .into_iter()
            .flat_map(|bucket| bucket.values())
            .filter(move |r| (include_deleted || !r.deleted) && predicate(&r.payload)))
    }

    /// Number of operations awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The pending log, oldest entry first.
    pub fn pending_entries(&self) -> &[crate::PendingEntry] {
        self.pending.entries()
    }

    /// Mark operations as acknowledged by a peer, removing them from the
    /// pending log. Unknown ids are ignored. Returns how many were removed.
    pub fn acknowledge(&mut self, op_ids: &[OpId]) -> usize {
        let removed = self.pending.acknowledge(op_ids);
        tracing::trace!(acknowledged = removed, remaining = self.pending.len(), "acknowledged ops");
        removed
    }

    /// Cheap introspection: identity, clock, and counts.
    pub fn metadata(&self) -> EngineMetadata {
        EngineMetadata {
            clock: self.clock.clone(),
            node_id: self.node_id.clone(),
            pending_count: self.pending.len(),
            record_count: self.records.values().map(|b| b.len()).sum(),
        }
    }

    /// Export the entire engine state as a self-contained snapshot.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            clock: self.clock.clone(),
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: self.node_id.clone(),
            pending: self.pending.entries().to_vec(),
            records: self.records.clone(),
            schema: self.schema.clone(),
        }
    }

    /// Replace the engine's state with a snapshot.
    ///
    /// The snapshot is validated first; on any error the engine keeps its
    /// pre-call state. Schema, node id, clock, records, and pending log are
    /// all taken from the snapshot.
    pub fn import(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(snapshot.format_version));
        }

        for (name, bucket) in &snapshot.records {
            let def = snapshot.schema.collection(name).ok_or_else(|| {
                Error::Malformed(format!("snapshot contains undeclared collection '{name}'"))
            })?;
            for record in bucket.values() {
                if !record.deleted {
                    def.validate_payload(&record.payload).map_err(|e| {
                        Error::Malformed(format!("snapshot record {name}/{}: {e}", record.id))
                    })?;
                }
            }
        }

        let Snapshot {
            clock,
            node_id,
            pending,
            mut records,
            schema,
            ..
        } = snapshot;

        for name in schema.collections.keys() {
            records.entry(name.clone()).or_default();
        }

        self.ledger = pending
            .iter()
            .map(|e| {
                (
                    e.operation.op_id().clone(),
                    (
                        e.operation.collection().clone(),
                        e.operation.record_id().clone(),
                    ),
                )
            })
            .collect();
        self.schema = schema;
        self.node_id = node_id;
        self.clock = clock;
        self.records = records;
        self.pending = PendingLog::from_entries(pending);

        tracing::debug!(
            node_id = %self.node_id,
            records = self.records.values().map(|b| b.len()).sum::<usize>(),
            pending = self.pending.len(),
            "imported snapshot"
        );
        Ok(())
    }
}
