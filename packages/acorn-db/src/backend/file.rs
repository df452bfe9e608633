//! File-per-key backend: one JSON envelope file per record.
//!
//! Record ids are hex-encoded into file names, so any id -- path separators,
//! dots, unicode -- maps to a safe, reversible name. Writes go through a
//! temp file followed by a rename, so readers never observe a half-written
//! envelope. Durable, no history.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use acorn_core::record::{RecordMeta, StoredRecord};
use acorn_core::{AcornError, Result};

use super::{entry_to_stored, stored_to_entry, Backend, Capabilities, EntryIter, StoredEntry};

/// Extension used for record envelope files.
const FILE_EXT: &str = "acorn";

/// One file per record under a dedicated directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Opens (creating if needed) a file-per-key store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// `BackendIo` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory this backend stores into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXT}", encode_name(id)))
    }

    fn read_envelope(path: &Path) -> Result<StoredRecord> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Hex-encodes an id into a filesystem-safe name.
fn encode_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len() * 2);
    for byte in id.as_bytes() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Reverses [`encode_name`]; `None` for names this backend did not produce.
fn decode_name(name: &str) -> Option<String> {
    if name.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(name.len() / 2);
    let chars = name.as_bytes();
    for pair in chars.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        bytes.push(u8::try_from(hi * 16 + lo).ok()?);
    }
    String::from_utf8(bytes).ok()
}

impl Backend for FileBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        let envelope = entry_to_stored(id, body, meta);
        let bytes = serde_json::to_vec(&envelope)?;

        // Write-then-rename so a crash mid-write leaves the old envelope.
        let target = self.path_for(id);
        let tmp = target.with_extension("tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let envelope = Self::read_envelope(&path)?;
        Ok(Some(stored_to_entry(&envelope)?))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        let mut items: Vec<Result<(String, StoredEntry)>> = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name)
            else {
                // Foreign file in our directory; not a record of ours.
                continue;
            };
            items.push(
                Self::read_envelope(&path)
                    .and_then(|env| stored_to_entry(&env))
                    .map(|entry| (id.clone(), entry))
                    .map_err(|e| AcornError::Corrupt(format!("{id}: {e}"))),
            );
        }
        Ok(Box::new(items.into_iter()))
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        // Corrupt envelopes are skipped here the same way open skips them.
        Ok(self.load_all()?.filter_map(std::result::Result::ok).collect())
    }

    fn history(&self, _id: &str) -> Result<Vec<StoredEntry>> {
        Err(AcornError::unsupported("history", "file"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_history: false,
            supports_sync: true,
            is_durable: true,
            supports_async: false,
            trunk_kind: "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{assert_backend_contract, meta_at};
    use super::*;

    fn open_temp() -> (tempfile::TempDir, FileBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::open(dir.path().join("store")).expect("open");
        (dir, backend)
    }

    #[test]
    fn satisfies_the_backend_contract() {
        let (_guard, backend) = open_temp();
        assert_backend_contract(&backend);
    }

    #[test]
    fn name_encoding_round_trips_hostile_ids() {
        for id in ["plain", "with/slash", "..", "säumige Eichhörnchen", "a:b*c?"] {
            let encoded = encode_name(id);
            assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(decode_name(&encoded).as_deref(), Some(id));
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let meta = meta_at(5_000);
        {
            let backend = FileBackend::open(dir.path()).expect("open");
            backend.save("persist-me", br#"{"v":9}"#, &meta).expect("save");
        }
        let backend = FileBackend::open(dir.path()).expect("reopen");
        let entry = backend.load("persist-me").expect("load").expect("present");
        assert_eq!(entry.meta.change_id, meta.change_id);
    }

    #[test]
    fn load_all_skips_foreign_files_and_flags_corrupt_ones() {
        let (_guard, backend) = open_temp();
        backend.save("good", br#"{"v":1}"#, &meta_at(1_000)).expect("save");

        // A foreign file is ignored entirely.
        fs::write(backend.dir().join("README.txt"), b"not a record").expect("write");
        // A corrupt envelope with a valid name surfaces as an Err item.
        fs::write(
            backend.dir().join(format!("{}.{FILE_EXT}", encode_name("bad"))),
            b"{truncated",
        )
        .expect("write");

        let items: Vec<_> = backend.load_all().expect("load_all").collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items.iter().filter(|i| i.is_ok()).count(), 1);
        assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    }

    #[test]
    fn delete_then_load_is_none() {
        let (_guard, backend) = open_temp();
        backend.save("gone", b"{}", &meta_at(1_000)).expect("save");
        backend.delete("gone").expect("delete");
        assert!(backend.load("gone").expect("load").is_none());
    }
}
