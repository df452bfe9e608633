//! Index hook root: pass-through instrumentation for the index subsystem.
//!
//! Transforms nothing. Counts documents flowing through each direction and
//! stashes the current document id in the context metadata so downstream
//! roots (and post-pipeline hooks) can correlate their work with a key.

use std::sync::atomic::{AtomicU64, Ordering};

use acorn_core::Result;

use super::{PipelineOp, Root, RootContext};

/// Metadata key under which the current document id is stashed.
pub const DOC_ID_KEY: &str = "index.doc_id";

/// Default pipeline position: first on the write path.
pub const INDEX_HOOK_SEQUENCE: i32 = 10;

/// Pass-through root feeding in-process counters.
#[derive(Default)]
pub struct IndexHookRoot {
    writes_seen: AtomicU64,
    reads_seen: AtomicU64,
}

impl IndexHookRoot {
    /// New hook with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents seen on the write path.
    #[must_use]
    pub fn writes_seen(&self) -> u64 {
        self.writes_seen.load(Ordering::Relaxed)
    }

    /// Documents seen on the read path.
    #[must_use]
    pub fn reads_seen(&self) -> u64 {
        self.reads_seen.load(Ordering::Relaxed)
    }

    fn observe(&self, op: PipelineOp, ctx: &mut RootContext) {
        match op {
            PipelineOp::Write => self.writes_seen.fetch_add(1, Ordering::Relaxed),
            PipelineOp::Read => self.reads_seen.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(id) = &ctx.doc_id {
            ctx.metadata.insert(DOC_ID_KEY.to_string(), id.clone());
        }
    }
}

impl Root for IndexHookRoot {
    fn name(&self) -> &str {
        "index-hook"
    }

    fn sequence(&self) -> i32 {
        INDEX_HOOK_SEQUENCE
    }

    fn on_write(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        self.observe(PipelineOp::Write, ctx);
        Ok(bytes.to_vec())
    }

    fn on_read(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        self.observe(PipelineOp::Read, ctx);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_bytes_through_and_counts() {
        let hook = IndexHookRoot::new();
        let mut ctx = RootContext::new(PipelineOp::Write, Some("k-9".to_string()));

        let out = hook.on_write(b"untouched", &mut ctx).expect("write");
        assert_eq!(out, b"untouched");
        assert_eq!(hook.writes_seen(), 1);
        assert_eq!(hook.reads_seen(), 0);

        hook.on_read(b"untouched", &mut ctx).expect("read");
        assert_eq!(hook.reads_seen(), 1);
    }

    #[test]
    fn stashes_the_document_id_in_metadata() {
        let hook = IndexHookRoot::new();
        let mut ctx = RootContext::new(PipelineOp::Write, Some("k-9".to_string()));
        hook.on_write(b"x", &mut ctx).expect("write");
        assert_eq!(ctx.metadata.get(DOC_ID_KEY).map(String::as_str), Some("k-9"));
    }

    #[test]
    fn anonymous_runs_leave_metadata_alone() {
        let hook = IndexHookRoot::new();
        let mut ctx = RootContext::new(PipelineOp::Read, None);
        hook.on_read(b"x", &mut ctx).expect("read");
        assert!(ctx.metadata.is_empty());
    }
}
