//! Records: the materialized state of `(collection, record_id)` pairs.

use crate::{CollectionName, HybridClock, RecordId, TimeMs, Version};
use serde::{Deserialize, Serialize};

/// Where a record's latest mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Issued on this replica.
    Local,
    /// Received from a peer.
    Remote,
}

/// Bookkeeping attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    /// Clock of the last applied operation.
    pub clock: HybridClock,
    /// Issuer timestamp of the operation that created the record.
    pub created_at: TimeMs,
    /// Source of the last mutation.
    pub origin: Origin,
    /// Issuer timestamp of the last applied operation.
    pub updated_at: TimeMs,
}

/// The current state of one record, tombstones included.
///
/// Records are never physically removed; a delete flips `deleted` so the
/// record keeps participating in conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Owning collection.
    pub collection: CollectionName,
    /// Tombstone flag.
    pub deleted: bool,
    /// Record id, unique within the collection.
    pub id: RecordId,
    /// Mutation bookkeeping.
    pub metadata: RecordMeta,
    /// Opaque JSON payload. A tombstone keeps its last live payload.
    pub payload: serde_json::Value,
    /// Version, starting at 1 and incremented by each admitted mutation.
    pub version: Version,
}

impl Record {
    /// Materialize a record from its first create, at version 1.
    pub fn first(
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        timestamp: TimeMs,
        clock: HybridClock,
        origin: Origin,
    ) -> Self {
        Self {
            collection: collection.into(),
            deleted: false,
            id: id.into(),
            metadata: RecordMeta {
                clock,
                created_at: timestamp,
                origin,
                updated_at: timestamp,
            },
            payload,
            version: 1,
        }
    }

    /// Apply a follow-up mutation, incrementing the version.
    ///
    /// `payload` of `None` keeps the last known payload (deletes);
    /// `created_at` is always preserved.
    pub fn supersede(
        &mut self,
        payload: Option<serde_json::Value>,
        deleted: bool,
        timestamp: TimeMs,
        clock: HybridClock,
        origin: Origin,
    ) {
        self.version += 1;
        self.write_state(payload, deleted, timestamp, clock, origin);
    }

    /// Replace the latest mutation in place, keeping the version.
    ///
    /// Used when a conflict winner takes over the version slot of the
    /// operation it displaced: a pending local op that lost, or a rival
    /// create for the same record.
    pub fn displace(
        &mut self,
        payload: Option<serde_json::Value>,
        deleted: bool,
        timestamp: TimeMs,
        clock: HybridClock,
        origin: Origin,
    ) {
        self.write_state(payload, deleted, timestamp, clock, origin);
    }

    fn write_state(
        &mut self,
        payload: Option<serde_json::Value>,
        deleted: bool,
        timestamp: TimeMs,
        clock: HybridClock,
        origin: Origin,
    ) {
        if let Some(payload) = payload {
            self.payload = payload;
        }
        self.deleted = deleted;
        self.metadata.updated_at = timestamp;
        self.metadata.clock = clock;
        self.metadata.origin = origin;
    }

    /// True when the record is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        Record::first(
            "r-1",
            "notes",
            json!({"title": "a"}),
            1000,
            HybridClock::at("replica-a", 1),
            Origin::Local,
        )
    }

    #[test]
    fn first_version_is_one() {
        let record = sample();
        assert_eq!(record.version, 1);
        assert!(!record.is_tombstone());
        assert_eq!(record.metadata.created_at, 1000);
        assert_eq!(record.metadata.updated_at, 1000);
        assert_eq!(record.metadata.origin, Origin::Local);
    }

    #[test]
    fn supersede_bumps_version_and_keeps_created_at() {
        let mut record = sample();
        record.supersede(
            Some(json!({"title": "b"})),
            false,
            2000,
            HybridClock::at("replica-a", 2),
            Origin::Local,
        );

        assert_eq!(record.version, 2);
        assert_eq!(record.payload, json!({"title": "b"}));
        assert_eq!(record.metadata.created_at, 1000);
        assert_eq!(record.metadata.updated_at, 2000);
    }

    #[test]
    fn delete_keeps_last_payload() {
        let mut record = sample();
        record.supersede(
            None,
            true,
            2000,
            HybridClock::at("replica-a", 2),
            Origin::Local,
        );

        assert!(record.is_tombstone());
        assert_eq!(record.version, 2);
        assert_eq!(record.payload, json!({"title": "a"}));
    }

    #[test]
    fn displace_keeps_version() {
        let mut record = sample();
        record.supersede(
            Some(json!({"title": "mine"})),
            false,
            2000,
            HybridClock::at("replica-a", 2),
            Origin::Local,
        );
        record.displace(
            Some(json!({"title": "theirs"})),
            false,
            2500,
            HybridClock::at("replica-b", 5),
            Origin::Remote,
        );

        assert_eq!(record.version, 2);
        assert_eq!(record.payload, json!({"title": "theirs"}));
        assert_eq!(record.metadata.clock, HybridClock::at("replica-b", 5));
        assert_eq!(record.metadata.origin, Origin::Remote);
    }

    #[test]
    fn serialization_roundtrip() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""createdAt":1000"#));
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
