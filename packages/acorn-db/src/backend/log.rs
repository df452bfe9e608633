//! Append-only log backend: a single `changes.log` of stash/delete events.
//!
//! The on-disk format is one UTF-8 JSON object per line, LF-terminated:
//!
//! ```text
//! {"op":"stash","record":{…wire envelope…}}
//! {"op":"delete","record":{"id":"…"}}
//! ```
//!
//! On open the log is replayed in order into an in-memory index; a `delete`
//! supersedes prior `stash` events for its id, and the final state is
//! authoritative. Corrupt lines are skipped with a counter, never aborting
//! the open. Because every version of every record stays in the log, this is
//! the one built-in backend with `supports_history`. [`compact`] rewrites
//! the log with only the latest non-delete event per id.
//!
//! [`compact`]: AppendLogBackend::compact

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use acorn_core::record::{RecordMeta, StoredRecord};
use acorn_core::Result;

use super::{entry_to_stored, stored_to_entry, Backend, Capabilities, EntryIter, StoredEntry};

/// Default log file name inside a collection directory.
pub const LOG_FILE_NAME: &str = "changes.log";

const OP_STASH: &str = "stash";
const OP_DELETE: &str = "delete";

/// Single-writer append-only log with a replayed in-memory index.
pub struct AppendLogBackend {
    path: PathBuf,
    state: RwLock<HashMap<String, StoredEntry>>,
    writer: Mutex<BufWriter<File>>,
    corrupt_lines_skipped: AtomicU64,
}

impl AppendLogBackend {
    /// Opens (creating if needed) the log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// `BackendIo` if the file cannot be opened; corrupt lines do not fail
    /// the open, they are skipped and counted.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut skipped = 0_u64;
        let mut state = HashMap::new();
        if path.exists() {
            replay(
                &path,
                &mut |op| match op {
                    Op::Stash(id, entry) => {
                        state.insert(id, entry);
                    }
                    Op::Delete(id) => {
                        state.remove(&id);
                    }
                },
                &mut skipped,
            )?;
        }

        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        if skipped > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped,
                "corrupt log lines skipped during replay"
            );
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
            writer: Mutex::new(BufWriter::new(file)),
            corrupt_lines_skipped: AtomicU64::new(skipped),
        })
    }

    /// Opens the conventional `changes.log` inside `dir`.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir.as_ref().join(LOG_FILE_NAME))
    }

    /// Number of corrupt lines skipped since open (including replay).
    #[must_use]
    pub fn corrupt_lines_skipped(&self) -> u64 {
        self.corrupt_lines_skipped.load(Ordering::Relaxed)
    }

    /// Rewrites the log keeping only the latest non-delete event per id.
    ///
    /// # Errors
    ///
    /// `BackendIo` on any filesystem failure; the original log is left in
    /// place unless the final rename succeeded.
    pub fn compact(&self) -> Result<()> {
        // Hold the writer for the whole rewrite so no append interleaves.
        let mut writer = self.writer.lock();
        writer.flush()?;

        let snapshot: Vec<(String, StoredEntry)> = {
            let state = self.state.read();
            let mut entries: Vec<_> =
                state.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        let tmp = self.path.with_extension("log.compacting");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for (id, entry) in &snapshot {
                write_event(&mut out, OP_STASH, &stash_record(id, entry)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::new(file);
        Ok(())
    }

    fn append(&self, op: &str, record: &serde_json::Value) -> Result<()> {
        let mut writer = self.writer.lock();
        write_event(&mut *writer, op, record)?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes one `{"op":…,"record":…}` event line.
fn write_event(out: &mut impl std::io::Write, op: &str, record: &serde_json::Value) -> Result<()> {
    let line = serde_json::to_string(&serde_json::json!({ "op": op, "record": record }))?;
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Builds the stash event's record value for an entry.
fn stash_record(id: &str, entry: &StoredEntry) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(entry_to_stored(
        id,
        &entry.body,
        &entry.meta,
    ))?)
}

enum Op {
    Stash(String, StoredEntry),
    Delete(String),
}

/// Replays the log in order, invoking `apply` per well-formed event.
fn replay(path: &Path, apply: &mut impl FnMut(Op), skipped: &mut u64) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event(&line) {
            Some(op) => apply(op),
            None => *skipped += 1,
        }
    }
    Ok(())
}

/// Parses one event line; `None` when the line is corrupt.
fn parse_event(line: &str) -> Option<Op> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let record = value.get("record")?;
    match value.get("op")?.as_str()? {
        OP_STASH => {
            let stored: StoredRecord = serde_json::from_value(record.clone()).ok()?;
            let entry = stored_to_entry(&stored).ok()?;
            Some(Op::Stash(stored.id, entry))
        }
        OP_DELETE => {
            let id = record.get("id")?.as_str()?.to_string();
            Some(Op::Delete(id))
        }
        _ => None,
    }
}

impl Backend for AppendLogBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        let entry = StoredEntry {
            body: body.to_vec(),
            meta: meta.clone(),
        };
        self.append(OP_STASH, &stash_record(id, &entry)?)?;
        self.state.write().insert(id.to_string(), entry);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        Ok(self.state.read().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.append(OP_DELETE, &serde_json::json!({ "id": id }))?;
        self.state.write().remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        let snapshot: Vec<_> = self
            .state
            .read()
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        Ok(self
            .state
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn history(&self, id: &str) -> Result<Vec<StoredEntry>> {
        // History is read back from the log itself, oldest first; holding it
        // in memory would defeat the point of a compactable log.
        {
            let mut writer = self.writer.lock();
            writer.flush()?;
        }
        let mut versions = Vec::new();
        let mut skipped = 0_u64;
        replay(
            &self.path,
            &mut |op| {
                if let Op::Stash(event_id, entry) = op {
                    if event_id == id {
                        versions.push(entry);
                    }
                }
            },
            &mut skipped,
        )?;
        self.corrupt_lines_skipped
            .fetch_add(skipped, Ordering::Relaxed);
        Ok(versions)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_history: true,
            supports_sync: true,
            is_durable: true,
            supports_async: false,
            trunk_kind: "append-log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{assert_backend_contract, meta_at};
    use super::*;

    fn open_temp() -> (tempfile::TempDir, AppendLogBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = AppendLogBackend::open_dir(dir.path()).expect("open");
        (dir, backend)
    }

    #[test]
    fn satisfies_the_backend_contract() {
        let (_guard, backend) = open_temp();
        assert_backend_contract(&backend);
    }

    #[test]
    fn lines_match_the_documented_format() {
        let (dir, backend) = open_temp();
        backend
            .save("k1", br#"{"v":1}"#, &meta_at(1_000))
            .expect("save");
        backend.delete("k1").expect("delete");

        let raw = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(raw.ends_with('\n'));

        let stash: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(stash["op"], "stash");
        assert_eq!(stash["record"]["id"], "k1");
        // Empty pipeline: the payload embeds as its original JSON.
        assert_eq!(stash["record"]["payload"]["v"], 1);

        let delete: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(delete["op"], "delete");
        assert_eq!(delete["record"]["id"], "k1");
    }

    #[test]
    fn replay_applies_deletes_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let backend = AppendLogBackend::open_dir(dir.path()).expect("open");
            backend.save("a", b"{}", &meta_at(1_000)).expect("save");
            backend.save("b", b"{}", &meta_at(2_000)).expect("save");
            backend.delete("a").expect("delete");
            backend.save("a", b"{}", &meta_at(3_000)).expect("resurrect");
            backend.delete("b").expect("delete");
        }

        let backend = AppendLogBackend::open_dir(dir.path()).expect("reopen");
        assert!(backend.load("a").expect("load").is_some());
        assert!(backend.load("b").expect("load").is_none());
    }

    #[test]
    fn corrupt_lines_are_skipped_and_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let backend = AppendLogBackend::open_dir(dir.path()).expect("open");
            backend.save("ok", b"{}", &meta_at(1_000)).expect("save");
        }
        let log_path = dir.path().join(LOG_FILE_NAME);
        let mut raw = fs::read_to_string(&log_path).expect("read");
        raw.push_str("{definitely not json\n");
        raw.push_str(r#"{"op":"mystery","record":{}}"#);
        raw.push('\n');
        fs::write(&log_path, raw).expect("write");

        let backend = AppendLogBackend::open_dir(dir.path()).expect("reopen");
        assert_eq!(backend.corrupt_lines_skipped(), 2);
        assert!(backend.load("ok").expect("load").is_some());
    }

    #[test]
    fn history_returns_versions_in_insertion_order() {
        let (_guard, backend) = open_temp();
        let m1 = meta_at(1_000);
        let mut m2 = meta_at(2_000);
        m2.version = 2;

        backend.save("k", br#"{"v":1}"#, &m1).expect("save v1");
        backend.save("k", br#"{"v":2}"#, &m2).expect("save v2");
        backend.save("other", b"{}", &meta_at(1_500)).expect("save");

        let history = backend.history("k").expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, br#"{"v":1}"#);
        assert_eq!(history[1].body, br#"{"v":2}"#);
    }

    #[test]
    fn history_survives_delete_events() {
        let (_guard, backend) = open_temp();
        backend.save("k", br#"{"v":1}"#, &meta_at(1_000)).expect("save");
        backend.delete("k").expect("delete");

        // Current state is gone, but the log still tells the story.
        assert!(backend.load("k").expect("load").is_none());
        assert_eq!(backend.history("k").expect("history").len(), 1);
    }

    #[test]
    fn compact_keeps_only_latest_non_delete_per_id() {
        let (dir, backend) = open_temp();
        backend.save("a", br#"{"v":1}"#, &meta_at(1_000)).expect("save");
        backend.save("a", br#"{"v":2}"#, &meta_at(2_000)).expect("save");
        backend.save("b", b"{}", &meta_at(3_000)).expect("save");
        backend.delete("b").expect("delete");

        backend.compact().expect("compact");

        let raw = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(event["record"]["id"], "a");
        assert_eq!(event["record"]["payload"]["v"], 2);

        // Appends still work after compaction.
        backend.save("c", b"{}", &meta_at(4_000)).expect("save post-compact");
        let backend2 = AppendLogBackend::open(dir.path().join(LOG_FILE_NAME)).expect("reopen");
        assert!(backend2.load("a").expect("load").is_some());
        assert!(backend2.load("c").expect("load").is_some());
        assert!(backend2.load("b").expect("load").is_none());
    }
}
