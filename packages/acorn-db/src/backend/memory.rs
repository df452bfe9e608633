//! Volatile in-memory backend backed by [`DashMap`].
//!
//! No persistence, no history. Useful for tests, caches of remote data, and
//! collections whose durability comes from replication rather than disk.

use dashmap::DashMap;

use acorn_core::record::RecordMeta;
use acorn_core::{AcornError, Result};

use super::{Backend, Capabilities, EntryIter, StoredEntry};

/// In-memory backend; concurrent access without external locking.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryBackend {
    /// Creates a new, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Backend for MemoryBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        self.entries.insert(
            id.to_string(),
            StoredEntry {
                body: body.to_vec(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.get(id).map(|e| e.clone()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        let snapshot: Vec<_> = self
            .entries
            .iter()
            .map(|e| Ok((e.key().clone(), e.value().clone())))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    fn history(&self, _id: &str) -> Result<Vec<StoredEntry>> {
        Err(AcornError::unsupported("history", "memory"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_history: false,
            supports_sync: true,
            is_durable: false,
            supports_async: false,
            trunk_kind: "memory",
        }
    }
}
