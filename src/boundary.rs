//! Host boundary: the C-compatible request/response surface.
//!
//! Hosting applications (Flutter, Swift, Kotlin, anything that can speak C)
//! drive the engine through these functions. All values cross the boundary
//! as JSON strings and every call either succeeds fully or has no effect.
//!
//! # Concurrency
//!
//! The handle wraps the engine in a reader-writer lock: pure reads may run
//! concurrently against each other, mutations take the lock exclusively for
//! the full call.
//!
//! # Memory Management
//!
//! - Strings returned by `tidemark_*` functions are allocated by Rust and
//!   must be freed with [`tidemark_string_free`]
//! - Engine handles must be freed with [`tidemark_engine_free`]
//!
//! # Responses
//!
//! Every JSON-returning function produces either
//! `{"ok": <result>}` or `{"error": {"kind": "...", "message": "..."}}`.

use crate::{
    Engine, Error, MergeStrategy, OpId, Operation, Schema, Snapshot, SNAPSHOT_FORMAT_VERSION,
};
use serde::Serialize;
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::RwLock;

/// Opaque engine handle handed across the boundary.
pub struct EngineHandle {
    inner: RwLock<Engine>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

fn ok_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => format!(r#"{{"ok":{body}}}"#),
        Err(e) => err_json(&Error::Internal(format!("encoding failed: {e}"))),
    }
}

fn err_json(error: &Error) -> String {
    let body = ErrorBody {
        kind: error.kind(),
        message: error.to_string(),
    };
    serde_json::to_string(&body)
        .map(|b| format!(r#"{{"error":{b}}}"#))
        .unwrap_or_else(|_| r#"{"error":{"kind":"internal","message":"encoding failed"}}"#.into())
}

/// Convert a Rust string into a heap-allocated C string.
/// The caller must free it with `tidemark_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => {
            let fallback = err_json(&Error::Internal("string contained null bytes".into()));
            CString::new(fallback.replace('\0', "")).unwrap().into_raw()
        }
    }
}

/// Read a C string into an owned Rust string.
/// Returns `None` for null pointers or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

unsafe fn with_read<F>(handle: *const EngineHandle, f: F) -> *mut c_char
where
    F: FnOnce(&Engine) -> String,
{
    let Some(handle) = handle.as_ref() else {
        return to_c_string(err_json(&Error::Malformed("null engine handle".into())));
    };
    match handle.inner.read() {
        Ok(engine) => to_c_string(f(&engine)),
        Err(_) => to_c_string(err_json(&Error::Internal("engine lock poisoned".into()))),
    }
}

unsafe fn with_write<F>(handle: *const EngineHandle, f: F) -> *mut c_char
where
    F: FnOnce(&mut Engine) -> String,
{
    let Some(handle) = handle.as_ref() else {
        return to_c_string(err_json(&Error::Malformed("null engine handle".into())));
    };
    match handle.inner.write() {
        Ok(mut engine) => to_c_string(f(&mut engine)),
        Err(_) => to_c_string(err_json(&Error::Internal("engine lock poisoned".into()))),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create an engine for a replica.
///
/// # Arguments
/// - `schema_json`: JSON-encoded schema
/// - `node_id`: non-empty replica identifier
///
/// # Returns
/// An engine handle, or null when the inputs cannot be decoded.
///
/// # Safety
/// - `schema_json` and `node_id` must be valid null-terminated C strings or null
/// - The returned handle must be freed with `tidemark_engine_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_engine_new(
    schema_json: *const c_char,
    node_id: *const c_char,
) -> *mut EngineHandle {
    let Some(schema_str) = from_c_string(schema_json) else {
        return ptr::null_mut();
    };
    let Some(node_id) = from_c_string(node_id) else {
        return ptr::null_mut();
    };
    if node_id.is_empty() {
        return ptr::null_mut();
    }
    let Ok(schema) = serde_json::from_str::<Schema>(&schema_str) else {
        return ptr::null_mut();
    };

    Box::into_raw(Box::new(EngineHandle {
        inner: RwLock::new(Engine::new(schema, node_id)),
    }))
}

/// Free an engine handle.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn tidemark_engine_free(handle: *mut EngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Free a string allocated by this library.
///
/// # Safety
/// - `s` must come from a `tidemark_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn tidemark_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Apply a locally issued operation.
///
/// # Returns
/// `{"ok": ApplyResult}` or an error envelope.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `op_json` must be a valid null-terminated C string or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_apply(
    handle: *mut EngineHandle,
    op_json: *const c_char,
    now_ms: i64,
) -> *mut c_char {
    let Some(op_str) = from_c_string(op_json) else {
        return to_c_string(err_json(&Error::Malformed("invalid operation string".into())));
    };
    with_write(handle, |engine| {
        let op: Operation = match serde_json::from_str(&op_str) {
            Ok(op) => op,
            Err(e) => return err_json(&Error::Malformed(e.to_string())),
        };
        match engine.apply(op, now_ms) {
            Ok(result) => ok_json(&result),
            Err(e) => err_json(&e),
        }
    })
}

/// Acknowledge pushed operations, removing them from the pending log.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `op_ids_json` must be a valid null-terminated C string or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_acknowledge(
    handle: *mut EngineHandle,
    op_ids_json: *const c_char,
) -> *mut c_char {
    let Some(ids_str) = from_c_string(op_ids_json) else {
        return to_c_string(err_json(&Error::Malformed("invalid op id list".into())));
    };
    with_write(handle, |engine| {
        let op_ids: Vec<OpId> = match serde_json::from_str(&ids_str) {
            Ok(ids) => ids,
            Err(e) => return err_json(&Error::Malformed(e.to_string())),
        };
        engine.acknowledge(&op_ids);
        ok_json(&serde_json::Value::Null)
    })
}

/// Advance the clock for a local event and return the new value.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_tick(handle: *mut EngineHandle) -> *mut c_char {
    with_write(handle, |engine| ok_json(&engine.tick()))
}

/// Reconcile a batch of remote operations.
///
/// # Arguments
/// - `batch_json`: JSON array of operations
/// - `strategy`: 0 for clock-wins, 1 for timestamp-wins
///
/// # Returns
/// `{"ok": ReconcileResult}` or an error envelope.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `batch_json` must be a valid null-terminated C string or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_reconcile(
    handle: *mut EngineHandle,
    batch_json: *const c_char,
    strategy: i32,
) -> *mut c_char {
    let Some(batch_str) = from_c_string(batch_json) else {
        return to_c_string(err_json(&Error::Malformed("invalid batch string".into())));
    };
    let strategy = match strategy {
        0 => MergeStrategy::ClockWins,
        1 => MergeStrategy::TimestampWins,
        other => {
            return to_c_string(err_json(&Error::Malformed(format!(
                "unknown merge strategy: {other}"
            ))))
        }
    };
    with_write(handle, |engine| {
        let batch: Vec<Operation> = match serde_json::from_str(&batch_str) {
            Ok(ops) => ops,
            Err(e) => return err_json(&Error::Malformed(e.to_string())),
        };
        ok_json(&engine.reconcile(batch, strategy))
    })
}

/// Replace the engine state from a snapshot.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_import(
    handle: *mut EngineHandle,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let Some(snapshot_str) = from_c_string(snapshot_json) else {
        return to_c_string(err_json(&Error::Malformed("invalid snapshot string".into())));
    };
    with_write(handle, |engine| {
        let snapshot = match Snapshot::from_json(&snapshot_str) {
            Ok(s) => s,
            Err(e) => return err_json(&e),
        };
        match engine.import(snapshot) {
            Ok(()) => ok_json(&serde_json::Value::Null),
            Err(e) => err_json(&e),
        }
    })
}

// ============================================================================
// Reads
// ============================================================================

/// Look up a record; tombstones are returned too.
///
/// # Returns
/// `{"ok": Record}` or `{"ok": null}` when absent.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `collection` and `id` must be valid null-terminated C strings or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_get(
    handle: *const EngineHandle,
    collection: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    let Some(collection) = from_c_string(collection) else {
        return to_c_string(err_json(&Error::Malformed("invalid collection string".into())));
    };
    let Some(id) = from_c_string(id) else {
        return to_c_string(err_json(&Error::Malformed("invalid id string".into())));
    };
    with_read(handle, |engine| ok_json(&engine.get(&collection, &id)))
}

/// All records of a collection, ordered by record id.
///
/// # Arguments
/// - `include_deleted`: 0 filters tombstones, non-zero keeps them
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - `collection` must be a valid null-terminated C string or null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_query(
    handle: *const EngineHandle,
    collection: *const c_char,
    include_deleted: i32,
) -> *mut c_char {
    let Some(collection) = from_c_string(collection) else {
        return to_c_string(err_json(&Error::Malformed("invalid collection string".into())));
    };
    with_read(handle, |engine| {
        match engine.query(&collection, include_deleted != 0) {
            Ok(records) => ok_json(&records),
            Err(e) => err_json(&e),
        }
    })
}

/// Number of operations awaiting acknowledgement, or -1 for a null handle.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
#[no_mangle]
pub unsafe extern "C" fn tidemark_pending_count(handle: *const EngineHandle) -> i64 {
    let Some(handle) = handle.as_ref() else {
        return -1;
    };
    match handle.inner.read() {
        Ok(engine) => engine.pending_count() as i64,
        Err(_) => -1,
    }
}

/// The pending log, oldest entry first.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_pending_ops(handle: *const EngineHandle) -> *mut c_char {
    with_read(handle, |engine| ok_json(&engine.pending_entries()))
}

/// Export the engine state as a snapshot.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_export(handle: *const EngineHandle) -> *mut c_char {
    with_read(handle, |engine| ok_json(&engine.export()))
}

/// Identity, clock, and counts without a full export.
///
/// # Safety
/// - `handle` must come from `tidemark_engine_new` or be null
/// - The returned string must be freed with `tidemark_string_free`
#[no_mangle]
pub unsafe extern "C" fn tidemark_metadata(handle: *const EngineHandle) -> *mut c_char {
    with_read(handle, |engine| ok_json(&engine.metadata()))
}

// ============================================================================
// Constants
// ============================================================================

/// The engine version string. Static; do not free.
#[no_mangle]
pub extern "C" fn tidemark_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// The snapshot format version this build reads and writes.
#[no_mangle]
pub extern "C" fn tidemark_snapshot_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}
