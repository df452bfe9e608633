//! Hot-map decorator over any backend.
//!
//! Keeps a `DashMap` of recently touched entries in front of the inner
//! backend: loads fill the map, saves write through it, deletes clear it.
//! The map is unbounded -- bounding the working set is the cache manager's
//! job at the collection layer; this wrapper exists to spare a slow inner
//! backend (disk, far side of a mirror) repeated reads of the same key.

use dashmap::DashMap;

use acorn_core::record::RecordMeta;
use acorn_core::Result;

use super::{Backend, Capabilities, EntryIter, StoredEntry};

/// Write-through hot map over an inner backend.
pub struct CachedBackend {
    inner: Box<dyn Backend>,
    hot: DashMap<String, StoredEntry>,
}

impl CachedBackend {
    /// Wraps `inner` with an empty hot map.
    #[must_use]
    pub fn new(inner: Box<dyn Backend>) -> Self {
        Self {
            inner,
            hot: DashMap::new(),
        }
    }

    /// Number of entries currently in the hot map.
    #[must_use]
    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    /// Drops every hot entry; subsequent loads go to the inner backend.
    pub fn invalidate(&self) {
        self.hot.clear();
    }
}

impl Backend for CachedBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        self.inner.save(id, body, meta)?;
        self.hot.insert(
            id.to_string(),
            StoredEntry {
                body: body.to_vec(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        if let Some(entry) = self.hot.get(id) {
            return Ok(Some(entry.clone()));
        }
        let loaded = self.inner.load(id)?;
        if let Some(entry) = &loaded {
            self.hot.insert(id.to_string(), entry.clone());
        }
        Ok(loaded)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id)?;
        self.hot.remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        self.inner.load_all()
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        self.inner.export_changes()
    }

    fn history(&self, id: &str) -> Result<Vec<StoredEntry>> {
        self.inner.history(id)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            trunk_kind: "cached",
            ..self.inner.capabilities()
        }
    }
}
