//! Operations: the immutable intent records that drive every mutation.
//!
//! Payloads replace the record wholesale; there are no partial-field merges.

use crate::{CollectionName, HybridClock, OpId, RecordId, TimeMs, Version};
use serde::{Deserialize, Serialize};

/// A mutation intent, identified by a globally unique `op_id`.
///
/// `timestamp` is wall-clock milliseconds as reported by the issuer; `clock`
/// is the issuer's hybrid logical clock at issuance. `base_version` is the
/// record version the issuer observed before mutating: binding for local
/// application, informational for remote reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    Create {
        clock: HybridClock,
        collection: CollectionName,
        id: RecordId,
        op_id: OpId,
        payload: serde_json::Value,
        timestamp: TimeMs,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        base_version: Version,
        clock: HybridClock,
        collection: CollectionName,
        id: RecordId,
        op_id: OpId,
        payload: serde_json::Value,
        timestamp: TimeMs,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        base_version: Version,
        clock: HybridClock,
        collection: CollectionName,
        id: RecordId,
        op_id: OpId,
        timestamp: TimeMs,
    },
}

impl Operation {
    /// Build a create operation.
    pub fn create(
        op_id: impl Into<OpId>,
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        timestamp: TimeMs,
        clock: HybridClock,
    ) -> Self {
        Operation::Create {
            clock,
            collection: collection.into(),
            id: id.into(),
            op_id: op_id.into(),
            payload,
            timestamp,
        }
    }

    /// Build an update operation.
    pub fn update(
        op_id: impl Into<OpId>,
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        base_version: Version,
        timestamp: TimeMs,
        clock: HybridClock,
    ) -> Self {
        Operation::Update {
            base_version,
            clock,
            collection: collection.into(),
            id: id.into(),
            op_id: op_id.into(),
            payload,
            timestamp,
        }
    }

    /// Build a delete operation.
    pub fn delete(
        op_id: impl Into<OpId>,
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        base_version: Version,
        timestamp: TimeMs,
        clock: HybridClock,
    ) -> Self {
        Operation::Delete {
            base_version,
            clock,
            collection: collection.into(),
            id: id.into(),
            op_id: op_id.into(),
            timestamp,
        }
    }

    /// The operation id.
    pub fn op_id(&self) -> &OpId {
        match self {
            Operation::Create { op_id, .. }
            | Operation::Update { op_id, .. }
            | Operation::Delete { op_id, .. } => op_id,
        }
    }

    /// The record this operation targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Operation::Create { id, .. }
            | Operation::Update { id, .. }
            | Operation::Delete { id, .. } => id,
        }
    }

    /// The collection this operation targets.
    pub fn collection(&self) -> &CollectionName {
        match self {
            Operation::Create { collection, .. }
            | Operation::Update { collection, .. }
            | Operation::Delete { collection, .. } => collection,
        }
    }

    /// The issuer's clock at issuance.
    pub fn clock(&self) -> &HybridClock {
        match self {
            Operation::Create { clock, .. }
            | Operation::Update { clock, .. }
            | Operation::Delete { clock, .. } => clock,
        }
    }

    /// The issuer's wall-clock milliseconds.
    pub fn timestamp(&self) -> TimeMs {
        match self {
            Operation::Create { timestamp, .. }
            | Operation::Update { timestamp, .. }
            | Operation::Delete { timestamp, .. } => *timestamp,
        }
    }

    /// The payload, if this operation carries one. Deletes do not.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Operation::Create { payload, .. } | Operation::Update { payload, .. } => Some(payload),
            Operation::Delete { .. } => None,
        }
    }

    /// The version the issuer based this mutation on. Creates have none.
    pub fn base_version(&self) -> Option<Version> {
        match self {
            Operation::Create { .. } => None,
            Operation::Update { base_version, .. } | Operation::Delete { base_version, .. } => {
                Some(*base_version)
            }
        }
    }

    /// True for delete operations.
    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete { .. })
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}
