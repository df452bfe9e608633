//! Pluggable storage backends ("trunks") behind a collection.
//!
//! Defines the [`Backend`] trait plus the concrete kinds and wrappers:
//!
//! - [`MemoryBackend`](memory::MemoryBackend): volatile `DashMap` store
//! - [`FileBackend`](file::FileBackend): one file per record
//! - [`AppendLogBackend`](log::AppendLogBackend): single JSON-lines log with
//!   replayed in-memory index and per-id history
//! - [`BtreeBackend`](btree::BtreeBackend): `redb` single-file B-tree
//! - [`CachedBackend`](cached::CachedBackend): hot-map decorator
//! - [`ResilientBackend`](resilient::ResilientBackend): retry + fallback +
//!   circuit breaker
//! - [`NearFarBackend`](nearfar::NearFarBackend): fast local store mirrored
//!   to a slower remote
//!
//! A backend stores the payload **bytes as produced by the root pipeline's
//! write pass** next to the record metadata, which stays in the clear. The
//! collection owns its backend exclusively; callers consult
//! [`Backend::capabilities`] before invoking optional operations -- history
//! on a backend without versions fails with `Unsupported` rather than
//! silently returning nothing.

#[cfg(feature = "redb")]
pub mod btree;
pub mod cached;
pub mod file;
pub mod log;
pub mod memory;
pub mod nearfar;
pub mod resilient;

use acorn_core::record::{RecordMeta, StoredRecord};
use acorn_core::Result;
use base64::Engine as _;

/// Feature flags a backend advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether [`Backend::history`] returns prior versions.
    pub supports_history: bool,
    /// Whether the backend can feed full-sync exports.
    pub supports_sync: bool,
    /// Whether data survives process restart.
    pub is_durable: bool,
    /// Whether the backend performs I/O off the calling thread. Always
    /// `false` for the built-in synchronous kinds; wrappers may differ.
    pub supports_async: bool,
    /// Short tag identifying the backend kind, e.g. `"memory"`.
    pub trunk_kind: &'static str,
}

/// A record as a backend stores it: pipeline-transformed payload bytes plus
/// clear-text metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Payload bytes after the root pipeline's write pass.
    pub body: Vec<u8>,
    /// Record metadata, never transformed.
    pub meta: RecordMeta,
}

/// Lazy iterator over all entries, used at collection open.
///
/// Corrupt entries surface as `Err` items so the caller can skip and count
/// them instead of aborting the open.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<(String, StoredEntry)>> + 'a>;

/// Durable persistence behind a collection.
///
/// Used as `Box<dyn Backend>`; all operations are synchronous and callable
/// from any thread.
pub trait Backend: Send + Sync {
    /// Insert or replace the entry for `id`. Idempotent.
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()>;

    /// Load the current entry for `id`, or `None`.
    fn load(&self, id: &str) -> Result<Option<StoredEntry>>;

    /// Remove the entry for `id`. May be soft (history-preserving) or hard;
    /// deleting an absent id is not an error.
    fn delete(&self, id: &str) -> Result<()>;

    /// Iterate all current entries.
    fn load_all(&self) -> Result<EntryIter<'_>>;

    /// Snapshot of all current entries, for full sync.
    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>>;

    /// Ordered prior versions of `id`, oldest first.
    ///
    /// # Errors
    ///
    /// `Unsupported` for backends that keep no versions.
    fn history(&self, id: &str) -> Result<Vec<StoredEntry>>;

    /// Feature flags for this backend.
    fn capabilities(&self) -> Capabilities;
}

/// Key under which non-JSON payload bytes are wrapped on disk.
const BYTES_FIELD: &str = "$bytes";

/// Encodes pipeline output bytes as a JSON payload value.
///
/// Bytes that already are compact JSON (the empty-pipeline case) embed
/// directly, keeping the on-disk format bit-compatible with the documented
/// log shape. Anything else (compressed, encrypted) wraps as
/// `{"$bytes": "<base64>"}`.
#[must_use]
pub(crate) fn body_to_wire(body: &[u8]) -> serde_json::Value {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if !looks_like_bytes_wrapper(&value) {
            return value;
        }
    }
    serde_json::json!({
        BYTES_FIELD: base64::engine::general_purpose::STANDARD.encode(body)
    })
}

/// Decodes a stored payload value back into pipeline input bytes.
pub(crate) fn wire_to_body(payload: &serde_json::Value) -> Result<Vec<u8>> {
    if looks_like_bytes_wrapper(payload) {
        let encoded = payload[BYTES_FIELD]
            .as_str()
            .ok_or_else(|| acorn_core::AcornError::Corrupt("$bytes is not a string".into()))?;
        return base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| acorn_core::AcornError::Corrupt(format!("$bytes decode: {e}")));
    }
    Ok(serde_json::to_vec(payload)?)
}

/// True for `{"$bytes": …}` objects, which must round-trip through the
/// wrapper even when the raw bytes happened to be valid JSON.
fn looks_like_bytes_wrapper(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.contains_key(BYTES_FIELD))
}

/// Builds the on-disk wire envelope for an entry.
pub(crate) fn entry_to_stored(id: &str, body: &[u8], meta: &RecordMeta) -> StoredRecord {
    StoredRecord::from_parts(id, body_to_wire(body), meta.clone())
}

/// Reconstructs a [`StoredEntry`] from the on-disk wire envelope.
pub(crate) fn stored_to_entry(stored: &StoredRecord) -> Result<StoredEntry> {
    Ok(StoredEntry {
        body: wire_to_body(&stored.payload)?,
        meta: stored.meta(),
    })
}
