//! # Tidemark
//!
//! A deterministic sync engine for offline-first, local-first applications.
//!
//! Tidemark holds a collection of schema-validated records, accepts local
//! mutation operations, reconciles them with operations produced on other
//! replicas, and produces an identical resulting state on every replica that
//! has seen the same set of operations. Client and server run the same
//! engine; a server is just another replica with durable storage and a
//! fan-out role.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, sockets, or platforms
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Testable**: pure logic, no mocks needed
//! - **Portable**: runs anywhere Rust runs (native, WASM, embedded)
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Data lives in records addressed by `(collection, record_id)`:
//! - version number, incremented on every successful mutation
//! - opaque JSON payload, validated against the schema
//! - metadata (timestamps, origin, hybrid logical clock)
//! - tombstone flag; deleted records stay around for conflict resolution
//!
//! ### Operations
//!
//! Changes are expressed as [`Operation`]s, never as direct mutations:
//! create, update (whole-payload replacement), and delete (tombstone).
//! Locally applied operations accumulate in a FIFO pending log until a peer
//! acknowledges them.
//!
//! ### Hybrid Logical Clock
//!
//! The [`HybridClock`] pairs a counter with a node id, advancing on local
//! emission and on observation of remote operations. It provides the total
//! order that makes merge decisions deterministic.
//!
//! ### Reconciliation
//!
//! [`Engine::reconcile`] merges a batch of remote operations into the store
//! and the pending log in one atomic step. Conflicts are resolved by a
//! [`MergeStrategy`]:
//! - [`MergeStrategy::ClockWins`] - higher hybrid clock wins (default)
//! - [`MergeStrategy::TimestampWins`] - later wall clock wins, clock tie-break
//!
//! ## Quick Start
//!
//! ```rust
//! use tidemark::{CollectionDef, Engine, FieldKind, FieldSpec, Operation, Schema};
//! use serde_json::json;
//!
//! // 1. Declare a schema
//! let schema = Schema::new(1).with_collection(CollectionDef::new(
//!     "notes",
//!     vec![
//!         FieldSpec::required("title", FieldKind::String),
//!         FieldSpec::optional("body", FieldKind::String),
//!     ],
//! ));
//!
//! // 2. Create an engine for this replica
//! let mut engine = Engine::new(schema, "device-a");
//!
//! // 3. Tick the clock, build an operation, apply it
//! let clock = engine.tick();
//! let op = Operation::create(
//!     "device-a_1706745600000_1",
//!     "note-1",
//!     "notes",
//!     json!({"title": "groceries"}),
//!     1_706_745_600_000,
//!     clock,
//! );
//! let applied = engine.apply(op, 1_706_745_600_000).unwrap();
//! assert_eq!(applied.version, 1);
//!
//! // 4. Read it back; the op now waits in the pending log
//! let record = engine.get("notes", "note-1").unwrap();
//! assert_eq!(record.payload, json!({"title": "groceries"}));
//! assert_eq!(engine.pending_count(), 1);
//! ```
//!
//! ## Host Boundary
//!
//! The [`boundary`] module exposes the engine to hosting applications as a
//! C-compatible request/response surface. All values cross as JSON strings;
//! reads may run concurrently, writes take an exclusive guard.
//!
//! ## Persistence
//!
//! The engine performs no IO. Hosts persist a single [`Snapshot`] obtained
//! from [`Engine::export`] and hand it back through [`Engine::import`].
//! Snapshots serialize canonically (sorted object keys), so equal states
//! produce byte-equal encodings.

pub mod boundary;
pub mod clock;
pub mod error;
pub mod op;
pub mod pending;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use clock::HybridClock;
pub use error::{Error, Result};
pub use op::Operation;
pub use pending::{PendingEntry, PendingLog};
pub use reconcile::{
    Conflict, ConflictResolution, MergeStrategy, ReconcileResult, RejectReason, RejectedOp,
};
pub use record::{Origin, Record, RecordMeta};
pub use schema::{CollectionDef, FieldKind, FieldSpec, Schema};
pub use snapshot::{Snapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{ApplyResult, Engine, EngineMetadata};

/// Record identifier within a collection.
pub type RecordId = String;
/// Collection name.
pub type CollectionName = String;
/// Replica identifier.
pub type NodeId = String;
/// Globally unique operation identifier.
pub type OpId = String;
/// Record version, starting at 1.
pub type Version = u64;
/// Wall-clock milliseconds since the Unix epoch.
pub type TimeMs = i64;
/// Schema version number.
pub type SchemaVersion = u32;

/// Engine version string, fixed at compile time.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
