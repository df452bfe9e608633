//! Near-far backend: a fast local store mirrored to a slower remote one.
//!
//! Writes go through the near side and are mirrored to the far side; a far
//! write failure degrades to a warning (the near side is authoritative for
//! this process, the far side catches up on the next save of the key).
//! Reads hit the near side first, consult the far side on a miss, and
//! backfill the near side with what they find. Deletes apply to both sides.
//! Capabilities combine: durable or history-capable if either side is.

use std::sync::atomic::{AtomicU64, Ordering};

use acorn_core::record::RecordMeta;
use acorn_core::{AcornError, Result};

use super::{Backend, Capabilities, EntryIter, StoredEntry};

/// Write-through near store with a best-effort far mirror.
pub struct NearFarBackend {
    near: Box<dyn Backend>,
    far: Box<dyn Backend>,
    far_write_failures: AtomicU64,
}

impl NearFarBackend {
    /// Pairs a fast `near` store with a slower `far` mirror.
    #[must_use]
    pub fn new(near: Box<dyn Backend>, far: Box<dyn Backend>) -> Self {
        Self {
            near,
            far,
            far_write_failures: AtomicU64::new(0),
        }
    }

    /// Number of far-side writes that failed and were degraded to warnings.
    #[must_use]
    pub fn far_write_failures(&self) -> u64 {
        self.far_write_failures.load(Ordering::Relaxed)
    }

    fn mirror(&self, what: &str, id: &str, outcome: Result<()>) {
        if let Err(err) = outcome {
            self.far_write_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %id, error = %err, "far-side {what} failed; near side is ahead");
        }
    }
}

impl Backend for NearFarBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        self.near.save(id, body, meta)?;
        self.mirror("save", id, self.far.save(id, body, meta));
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        if let Some(entry) = self.near.load(id)? {
            return Ok(Some(entry));
        }
        let far_hit = self.far.load(id)?;
        if let Some(entry) = &far_hit {
            // Backfill so the next read stays near.
            self.mirror("backfill", id, self.near.save(id, &entry.body, &entry.meta));
        }
        Ok(far_hit)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.near.delete(id)?;
        self.mirror("delete", id, self.far.delete(id));
        Ok(())
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        self.near.load_all()
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        self.near.export_changes()
    }

    fn history(&self, id: &str) -> Result<Vec<StoredEntry>> {
        match self.near.history(id) {
            Err(AcornError::Unsupported { .. }) => self.far.history(id),
            other => other,
        }
    }

    fn capabilities(&self) -> Capabilities {
        let near = self.near.capabilities();
        let far = self.far.capabilities();
        Capabilities {
            supports_history: near.supports_history || far.supports_history,
            supports_sync: near.supports_sync || far.supports_sync,
            is_durable: near.is_durable || far.is_durable,
            supports_async: near.supports_async || far.supports_async,
            trunk_kind: "near-far",
        }
    }
}
