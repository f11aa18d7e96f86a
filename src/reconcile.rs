//! Reconciliation: merging remote operation batches into local state.
//!
//! This is where determinism is earned. Remote operations are grouped by
//! record, ordered by the active merge strategy, and played against a
//! copy-on-write view of the touched records. The store and the pending log
//! are updated in one atomic step at the end; no intermediate state is ever
//! observable.

use crate::{
    CollectionName, Engine, HybridClock, OpId, Operation, Origin, Record, RecordId, TimeMs,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Deterministic rule for choosing between two operations on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Higher hybrid clock wins; ties break on node id (default).
    #[default]
    ClockWins,
    /// Later wall-clock timestamp wins; ties fall through to the clock.
    TimestampWins,
}

impl MergeStrategy {
    /// Compare two merge keys under this strategy.
    pub fn cmp_keys(
        self,
        a_time: TimeMs,
        a_clock: &HybridClock,
        b_time: TimeMs,
        b_clock: &HybridClock,
    ) -> Ordering {
        match self {
            MergeStrategy::ClockWins => a_clock.cmp(b_clock),
            MergeStrategy::TimestampWins => {
                a_time.cmp(&b_time).then_with(|| a_clock.cmp(b_clock))
            }
        }
    }

    /// Compare two operations by their merge keys.
    pub fn cmp_ops(self, a: &Operation, b: &Operation) -> Ordering {
        self.cmp_keys(a.timestamp(), a.clock(), b.timestamp(), b.clock())
    }

    fn cmp_op_to_record(self, op: &Operation, record: &Record) -> Ordering {
        self.cmp_keys(
            op.timestamp(),
            op.clock(),
            record.metadata.updated_at,
            &record.metadata.clock,
        )
    }
}

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    LocalWins,
    RemoteWins,
}

/// A detected disagreement between two operations on the same record.
///
/// Conflicts are observations, not failures; the reconciler has already
/// resolved them deterministically by the time they are reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The operation on this replica's side of the disagreement.
    pub local_op: Operation,
    /// The incoming remote operation.
    pub remote_op: Operation,
    /// Who won.
    pub resolution: ConflictResolution,
    /// Op id of the winning side.
    pub winner_op_id: OpId,
}

/// Why a remote operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// Already processed, or an identical merge key to the current state.
    Duplicate,
    /// Schema-invalid or structurally unusable.
    Malformed,
    /// Update or delete targeting a record this replica has never seen.
    OrphanOp,
    /// Lost to a record state with a dominating merge key.
    Stale,
}

/// A rejected remote operation and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedOp {
    pub op_id: OpId,
    pub reason: RejectReason,
}

/// Outcome of one reconciliation batch.
///
/// All lists are stably ordered: op ids ascending, conflicts by
/// `(collection, record id, winner op id)` ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Pending local operations that survived the batch.
    pub accepted_local: Vec<OpId>,
    /// Remote operations applied to the store.
    pub applied_remote: Vec<OpId>,
    /// Conflicts detected and resolved during the batch.
    pub conflicts: Vec<Conflict>,
    /// Pending local operations overwritten by a remote winner.
    pub rejected_local: Vec<OpId>,
    /// Remote operations rejected, with reasons.
    pub rejected_remote: Vec<RejectedOp>,
}

/// Copy-on-write view of one record during reconciliation.
struct Slot {
    dirty: bool,
    /// The operation that produced `record`'s current state, when known or
    /// reconstructable. Used for conflict reporting.
    last_op: Option<Operation>,
    /// Whether `last_op` is sitting in the pending log.
    last_is_pending: bool,
    record: Option<Record>,
}

/// Reconstruct the operation implied by a record's current state.
///
/// Needed when the record's latest mutation is no longer in the pending log
/// (acknowledged, or remote-authored) but a conflict must still name both
/// sides. The id is derived deterministically from the record's metadata.
fn implied_op(record: &Record) -> Operation {
    let meta = &record.metadata;
    let op_id = format!(
        "{}_{}_{}",
        meta.clock.node_id, meta.updated_at, meta.clock.counter
    );
    if record.deleted {
        Operation::delete(
            op_id,
            record.id.clone(),
            record.collection.clone(),
            record.version.saturating_sub(1),
            meta.updated_at,
            meta.clock.clone(),
        )
    } else if record.version == 1 {
        Operation::create(
            op_id,
            record.id.clone(),
            record.collection.clone(),
            record.payload.clone(),
            meta.updated_at,
            meta.clock.clone(),
        )
    } else {
        Operation::update(
            op_id,
            record.id.clone(),
            record.collection.clone(),
            record.payload.clone(),
            record.version.saturating_sub(1),
            meta.updated_at,
            meta.clock.clone(),
        )
    }
}

impl Engine {
    /// Merge a batch of remote operations into the store and pending log.
    ///
    /// Per-operation problems never fail the batch; offending operations
    /// land in `rejected_remote` with a reason. The store and the pending
    /// log are updated atomically, and the same pre-state, batch, and
    /// strategy always produce the same post-state and result.
    pub fn reconcile(&mut self, batch: Vec<Operation>, strategy: MergeStrategy) -> ReconcileResult {
        let batch_len = batch.len();
        let mut out = ReconcileResult::default();

        // Triage: reject malformed and already-seen ops up front, observe
        // the clock of everything that survives, and group by record.
        let mut groups: BTreeMap<(CollectionName, RecordId), Vec<Operation>> = BTreeMap::new();
        let mut batch_ids: HashSet<OpId> = HashSet::new();
        for op in batch {
            if let Err(err) = self.schema.validate_op(&op) {
                tracing::debug!(op_id = %op.op_id(), error = %err, "rejecting malformed remote op");
                out.rejected_remote.push(RejectedOp {
                    op_id: op.op_id().clone(),
                    reason: RejectReason::Malformed,
                });
                continue;
            }
            if self.ledger.contains_key(op.op_id()) || !batch_ids.insert(op.op_id().clone()) {
                out.rejected_remote.push(RejectedOp {
                    op_id: op.op_id().clone(),
                    reason: RejectReason::Duplicate,
                });
                continue;
            }
            self.clock.observe(op.clock());
            groups
                .entry((op.collection().clone(), op.record_id().clone()))
                .or_default()
                .push(op);
        }

        let mut pending_losers: HashSet<OpId> = HashSet::new();
        let mut ledger_adds: Vec<(OpId, (CollectionName, RecordId))> = Vec::new();
        let mut touched: Vec<((CollectionName, RecordId), Record)> = Vec::new();

        for ((collection, record_id), mut ops) in groups {
            // Ascending by merge key: the strongest op is applied last.
            ops.sort_by(|a, b| {
                strategy
                    .cmp_ops(a, b)
                    .then_with(|| a.op_id().cmp(b.op_id()))
            });

            let mut slot = self.slot_for(&collection, &record_id);

            for op in ops {
                let Some(record) = slot.record.as_ref() else {
                    if matches!(op, Operation::Create { .. }) {
                        ledger_adds.push((
                            op.op_id().clone(),
                            (collection.clone(), record_id.clone()),
                        ));
                        out.applied_remote.push(op.op_id().clone());
                        apply_to_slot(&mut slot, &collection, &record_id, &op, true);
                    } else {
                        // Orphans stay out of the ledger so the op can still
                        // apply if its record's create arrives later.
                        out.rejected_remote.push(RejectedOp {
                            op_id: op.op_id().clone(),
                            reason: RejectReason::OrphanOp,
                        });
                    }
                    continue;
                };

                ledger_adds.push((
                    op.op_id().clone(),
                    (collection.clone(), record_id.clone()),
                ));

                match strategy.cmp_op_to_record(&op, record) {
                    Ordering::Greater => {
                        // A losing pending op surrenders its version slot,
                        // and rival creates collapse into the winner's slot;
                        // a create that revives a tombstone increments.
                        let is_create = matches!(op, Operation::Create { .. });
                        let bump = if record.deleted {
                            is_create || !slot.last_is_pending
                        } else if is_create
                            && matches!(slot.last_op, Some(Operation::Create { .. }))
                        {
                            false
                        } else {
                            !slot.last_is_pending
                        };
                        if slot.last_is_pending {
                            if let Some(local) = slot.last_op.clone() {
                                pending_losers.insert(local.op_id().clone());
                                out.conflicts.push(Conflict {
                                    local_op: local,
                                    remote_op: op.clone(),
                                    resolution: ConflictResolution::RemoteWins,
                                    winner_op_id: op.op_id().clone(),
                                });
                            }
                        }
                        out.applied_remote.push(op.op_id().clone());
                        apply_to_slot(&mut slot, &collection, &record_id, &op, bump);
                    }
                    Ordering::Less => {
                        out.rejected_remote.push(RejectedOp {
                            op_id: op.op_id().clone(),
                            reason: RejectReason::Stale,
                        });
                        // A stale op from another replica is a genuine
                        // disagreement; re-delivery from the author is not.
                        if op.clock().node_id != record.metadata.clock.node_id {
                            if let Some(current) = slot.last_op.clone() {
                                let winner_op_id = current.op_id().clone();
                                out.conflicts.push(Conflict {
                                    local_op: current,
                                    remote_op: op,
                                    resolution: ConflictResolution::LocalWins,
                                    winner_op_id,
                                });
                            }
                        }
                    }
                    Ordering::Equal => {
                        out.rejected_remote.push(RejectedOp {
                            op_id: op.op_id().clone(),
                            reason: RejectReason::Duplicate,
                        });
                    }
                }
            }

            if slot.dirty {
                if let Some(record) = slot.record {
                    touched.push(((collection, record_id), record));
                }
            }
        }

        // Commit: all mutations land together.
        for ((collection, record_id), record) in touched {
            self.records
                .entry(collection)
                .or_default()
                .insert(record_id, record);
        }
        if !pending_losers.is_empty() {
            self.pending.remove(&pending_losers);
        }
        for (op_id, key) in ledger_adds {
            self.ledger.insert(op_id, key);
        }

        out.rejected_local = pending_losers.into_iter().collect();
        out.accepted_local = self.pending.op_ids().cloned().collect();

        out.accepted_local.sort_unstable();
        out.rejected_local.sort_unstable();
        out.applied_remote.sort_unstable();
        out.rejected_remote.sort_by(|a, b| a.op_id.cmp(&b.op_id));
        out.conflicts.sort_by(|a, b| {
            (a.remote_op.collection(), a.remote_op.record_id(), &a.winner_op_id).cmp(&(
                b.remote_op.collection(),
                b.remote_op.record_id(),
                &b.winner_op_id,
            ))
        });

        tracing::debug!(
            batch = batch_len,
            applied = out.applied_remote.len(),
            rejected = out.rejected_remote.len(),
            conflicts = out.conflicts.len(),
            "reconciled remote batch"
        );
        out
    }

    fn slot_for(&self, collection: &str, record_id: &str) -> Slot {
        let record = self
            .records
            .get(collection)
            .and_then(|c| c.get(record_id))
            .cloned();

        match record {
            None => Slot {
                dirty: false,
                last_op: None,
                last_is_pending: false,
                record: None,
            },
            Some(record) => {
                let pending = self
                    .pending
                    .latest_for(collection, record_id)
                    .filter(|e| e.operation.clock() == &record.metadata.clock);
                match pending {
                    Some(entry) => Slot {
                        dirty: false,
                        last_op: Some(entry.operation.clone()),
                        last_is_pending: true,
                        record: Some(record),
                    },
                    None => Slot {
                        dirty: false,
                        last_op: Some(implied_op(&record)),
                        last_is_pending: false,
                        record: Some(record),
                    },
                }
            }
        }
    }
}

fn apply_to_slot(slot: &mut Slot, collection: &str, record_id: &str, op: &Operation, bump: bool) {
    let timestamp = op.timestamp();
    let clock = op.clock().clone();
    match slot.record.as_mut() {
        Some(record) => {
            if bump {
                record.supersede(
                    op.payload().cloned(),
                    op.is_delete(),
                    timestamp,
                    clock,
                    Origin::Remote,
                );
            } else {
                record.displace(
                    op.payload().cloned(),
                    op.is_delete(),
                    timestamp,
                    clock,
                    Origin::Remote,
                );
            }
            if matches!(op, Operation::Create { .. }) {
                // a winning create establishes creation time anew
                record.metadata.created_at = timestamp;
            }
        }
        None => {
            slot.record = Some(Record::first(
                record_id.to_string(),
                collection.to_string(),
                op.payload().cloned().unwrap_or(serde_json::Value::Null),
                timestamp,
                clock,
                Origin::Remote,
            ));
        }
    }
    slot.last_op = Some(op.clone());
    slot.last_is_pending = false;
    slot.dirty = true;
}
