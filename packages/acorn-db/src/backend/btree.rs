//! B-tree backend on a single mmapped file, via `redb`.
//!
//! Durable, transactional, no history: `redb` keeps only the latest value
//! per key. Envelopes are stored as JSON bytes under the record id in one
//! table. Enabled through the `redb` cargo feature (on by default).

use std::path::PathBuf;

use redb::{Database, ReadableTable as _, TableDefinition};

use acorn_core::record::{RecordMeta, StoredRecord};
use acorn_core::{AcornError, Result};

use super::{entry_to_stored, stored_to_entry, Backend, Capabilities, EntryIter, StoredEntry};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("acorn_records");

/// Single-file B-tree store.
pub struct BtreeBackend {
    db: Database,
    path: PathBuf,
}

impl BtreeBackend {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// `BackendIo` if the file cannot be created or opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(io_err)?;

        // Make sure the table exists so reads on a fresh file don't error.
        let txn = db.begin_write().map_err(io_err)?;
        txn.open_table(RECORDS).map_err(io_err)?;
        txn.commit().map_err(io_err)?;

        Ok(Self { db, path })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn decode(raw: &[u8]) -> Result<StoredEntry> {
        let stored: StoredRecord = serde_json::from_slice(raw)?;
        stored_to_entry(&stored)
    }
}

/// Maps any `redb` failure to the backend I/O error kind.
fn io_err(err: impl std::fmt::Display) -> AcornError {
    AcornError::BackendIo(err.to_string())
}

impl Backend for BtreeBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        let bytes = serde_json::to_vec(&entry_to_stored(id, body, meta))?;
        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = txn.open_table(RECORDS).map_err(io_err)?;
            table.insert(id, bytes.as_slice()).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(RECORDS).map_err(io_err)?;
        match table.get(id).map_err(io_err)? {
            Some(guard) => Ok(Some(Self::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = txn.open_table(RECORDS).map_err(io_err)?;
            table.remove(id).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(RECORDS).map_err(io_err)?;

        let mut items: Vec<Result<(String, StoredEntry)>> = Vec::new();
        for pair in table.iter().map_err(io_err)? {
            let (key, value) = pair.map_err(io_err)?;
            let id = key.value().to_string();
            items.push(
                Self::decode(value.value())
                    .map(|entry| (id.clone(), entry))
                    .map_err(|e| AcornError::Corrupt(format!("{id}: {e}"))),
            );
        }
        Ok(Box::new(items.into_iter()))
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        Ok(self.load_all()?.filter_map(std::result::Result::ok).collect())
    }

    fn history(&self, _id: &str) -> Result<Vec<StoredEntry>> {
        Err(AcornError::unsupported("history", "btree"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_history: false,
            supports_sync: true,
            is_durable: true,
            supports_async: false,
            trunk_kind: "btree",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{assert_backend_contract, meta_at};
    use super::*;

    fn open_temp() -> (tempfile::TempDir, BtreeBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = BtreeBackend::open(dir.path().join("store.redb")).expect("open");
        (dir, backend)
    }

    #[test]
    fn satisfies_the_backend_contract() {
        let (_guard, backend) = open_temp();
        assert_backend_contract(&backend);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.redb");
        let meta = meta_at(7_000);
        {
            let backend = BtreeBackend::open(&path).expect("open");
            backend.save("acorn", br#"{"n":1}"#, &meta).expect("save");
        }
        let backend = BtreeBackend::open(&path).expect("reopen");
        let entry = backend.load("acorn").expect("load").expect("present");
        assert_eq!(entry.meta.change_id, meta.change_id);
        assert_eq!(entry.body, br#"{"n":1}"#);
    }

    #[test]
    fn fresh_database_loads_empty() {
        let (_guard, backend) = open_temp();
        assert_eq!(backend.load_all().expect("load_all").count(), 0);
        assert!(backend.load("missing").expect("load").is_none());
    }

    #[test]
    fn history_is_unsupported() {
        let (_guard, backend) = open_temp();
        assert!(matches!(
            backend.history("any"),
            Err(AcornError::Unsupported { .. })
        ));
    }
}
