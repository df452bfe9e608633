//! Root pipeline: an ordered chain of byte transforms on every read/write.
//!
//! A [`Root`] is a pair of inverse-ish transforms -- `on_write` applied when
//! payload bytes head to the backend, `on_read` applied on the way back --
//! plus a `sequence` number used solely for ordering. Writes traverse roots
//! in ascending sequence, reads in descending sequence, so a chain of
//! compression (100) then encryption (200) compresses before encrypting on
//! write and decrypts before decompressing on read.
//!
//! The pipeline accounts per-root [`RootMetrics`] (bytes in/out, operation
//! and error counts) around every call, and threads a [`RootContext`]
//! through the chain carrying the operation tag, the document id, the
//! accumulated signature trail, and free-form metadata.
//!
//! Provided roots:
//!
//! - [`CompressionRoot`](compression::CompressionRoot): gzip / brotli /
//!   identity
//! - [`EncryptionRoot`](encryption::EncryptionRoot): AES-256-CBC with
//!   PBKDF2-derived or explicit key material
//! - [`PolicyRoot`](policy::PolicyRoot): delegate payload validation to a
//!   [`PolicyEngine`](policy::PolicyEngine)
//! - [`IndexHookRoot`](index_hook::IndexHookRoot): pass-through counters

pub mod compression;
pub mod encryption;
pub mod index_hook;
pub mod policy;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use acorn_core::Result;

/// Which direction the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOp {
    /// Payload bytes heading to the backend.
    Write,
    /// Payload bytes coming back from the backend.
    Read,
}

/// Optional policy sub-context a collection can attach for policy roots.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    /// Acting subject, when known (user, service, node).
    pub subject: Option<String>,
    /// Free-form attributes consulted by policy engines.
    pub attributes: BTreeMap<String, String>,
}

/// Context threaded through a single pipeline run.
#[derive(Debug, Clone)]
pub struct RootContext {
    /// Direction of this run.
    pub operation: PipelineOp,
    /// Id of the document being transformed, when known.
    pub doc_id: Option<String>,
    /// Tamper-evident trail of transformation signatures, append-only.
    pub signatures: Vec<String>,
    /// Free-form metadata roots may read and write.
    pub metadata: BTreeMap<String, String>,
    /// Policy sub-context, when the collection carries one.
    pub policy: Option<PolicyContext>,
}

impl RootContext {
    /// Fresh context for one pipeline run.
    #[must_use]
    pub fn new(operation: PipelineOp, doc_id: Option<String>) -> Self {
        Self {
            operation,
            doc_id,
            signatures: Vec::new(),
            metadata: BTreeMap::new(),
            policy: None,
        }
    }

    /// Appends a transformation signature to the trail.
    pub fn sign(&mut self, signature: impl Into<String>) {
        self.signatures.push(signature.into());
    }
}

/// One byte transform in the chain.
///
/// Implementations must be inverse pairs where defined:
/// `on_read(on_write(x)) == x`. A root given input it did not produce (a
/// decompressor fed a non-compressed stream) fails with `Corrupt` rather
/// than passing corrupted bytes downstream.
pub trait Root: Send + Sync {
    /// Name used for metrics lookup and logs.
    fn name(&self) -> &str;

    /// Ordering key: ascending on write, descending on read.
    fn sequence(&self) -> i32;

    /// Transform applied on the write path.
    ///
    /// # Errors
    ///
    /// Transform-specific; a failure aborts the whole operation.
    fn on_write(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>>;

    /// Transform applied on the read path.
    ///
    /// # Errors
    ///
    /// `Corrupt` when the input was not produced by this root's `on_write`.
    fn on_read(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>>;
}

/// Per-root byte and operation counters.
#[derive(Debug, Default)]
pub struct RootMetrics {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    writes: AtomicU64,
    reads: AtomicU64,
    errors: AtomicU64,
}

impl RootMetrics {
    fn record(&self, op: PipelineOp, bytes_in: usize, outcome: &Result<Vec<u8>>) {
        self.bytes_in.fetch_add(bytes_in as u64, Ordering::Relaxed);
        match op {
            PipelineOp::Write => self.writes.fetch_add(1, Ordering::Relaxed),
            PipelineOp::Read => self.reads.fetch_add(1, Ordering::Relaxed),
        };
        match outcome {
            Ok(out) => {
                self.bytes_out.fetch_add(out.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> RootMetricsSnapshot {
        RootMetricsSnapshot {
            total_bytes_in: self.bytes_in.load(Ordering::Relaxed),
            total_bytes_out: self.bytes_out.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Copyable view of a root's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootMetricsSnapshot {
    /// Bytes fed into the root, both directions.
    pub total_bytes_in: u64,
    /// Bytes produced by the root, both directions.
    pub total_bytes_out: u64,
    /// Write-path invocations.
    pub writes: u64,
    /// Read-path invocations.
    pub reads: u64,
    /// Failed invocations.
    pub errors: u64,
}

struct RootSlot {
    root: Arc<dyn Root>,
    metrics: Arc<RootMetrics>,
}

/// User-ordered chain of roots applied to payload bytes.
#[derive(Default)]
pub struct RootPipeline {
    // Kept sorted ascending by sequence; reads walk it backwards.
    slots: Vec<RootSlot>,
}

impl RootPipeline {
    /// Empty pipeline: bytes pass through untouched.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pipeline from roots in any order.
    #[must_use]
    pub fn with_roots(roots: Vec<Arc<dyn Root>>) -> Self {
        let mut pipeline = Self::new();
        for root in roots {
            pipeline.add(root);
        }
        pipeline
    }

    /// Inserts a root at its sequence position.
    pub fn add(&mut self, root: Arc<dyn Root>) {
        let at = self
            .slots
            .partition_point(|slot| slot.root.sequence() <= root.sequence());
        self.slots.insert(
            at,
            RootSlot {
                root,
                metrics: Arc::new(RootMetrics::default()),
            },
        );
    }

    /// True when no roots are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of installed roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Names in write order.
    #[must_use]
    pub fn root_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.root.name().to_string())
            .collect()
    }

    /// Metrics snapshot for the named root.
    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<RootMetricsSnapshot> {
        self.slots
            .iter()
            .find(|s| s.root.name() == name)
            .map(|s| s.metrics.snapshot())
    }

    /// Runs the write pass: ascending sequence order.
    ///
    /// # Errors
    ///
    /// The first failing root aborts the pass.
    pub fn on_write(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> Result<Vec<u8>> {
        let mut current = bytes;
        for slot in &self.slots {
            let outcome = slot.root.on_write(&current, ctx);
            slot.metrics.record(PipelineOp::Write, current.len(), &outcome);
            current = outcome?;
        }
        Ok(current)
    }

    /// Runs the read pass: descending sequence order.
    ///
    /// # Errors
    ///
    /// The first failing root aborts the pass.
    pub fn on_read(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> Result<Vec<u8>> {
        let mut current = bytes;
        for slot in self.slots.iter().rev() {
            let outcome = slot.root.on_read(&current, ctx);
            slot.metrics.record(PipelineOp::Read, current.len(), &outcome);
            current = outcome?;
        }
        Ok(current)
    }
}
