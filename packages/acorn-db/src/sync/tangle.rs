//! Tangles: one entanglement between a collection and a peer.
//!
//! A [`Tangle`] wraps a [`Peer`] with its sync mode, per-peer conflict
//! override, delta-sync flag, last-sync timestamp, statistics, and disposed
//! state. The collection holds `Arc<Tangle<T>>`s under its cache lock but
//! pushes strictly outside it, so all mutable tangle state is atomic.
//!
//! Lifecycle: Active until `dispose()` (detangle or collection teardown);
//! every operation on a disposed tangle fails with `Disposed`, and
//! re-entangling a disposed tangle is not supported -- build a new one.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use acorn_core::judge::ConflictDirection;
use acorn_core::record::Record;
use acorn_core::{AcornError, Result};

use super::peer::{Delivery, Peer};

/// Replication direction of a tangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Push local mutations and accept remote deliveries.
    #[default]
    Bidirectional,
    /// Push local mutations; inbound deliveries are ignored.
    PushOnly,
    /// Never push; accept inbound deliveries.
    PullOnly,
    /// Inert placeholder, useful in tests.
    Disabled,
}

impl SyncMode {
    /// Whether local mutations are pushed through this tangle.
    #[must_use]
    pub fn pushes(self) -> bool {
        matches!(self, Self::Bidirectional | Self::PushOnly)
    }

    /// Whether the tangle pulls during `shake()`.
    #[must_use]
    pub fn pulls(self) -> bool {
        matches!(self, Self::Bidirectional | Self::PullOnly)
    }
}

/// Point-in-time copy of a tangle's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TangleStatsSnapshot {
    /// Deliveries pushed successfully.
    pub pushes: u64,
    /// Failed push or pull attempts (counted, never surfaced).
    pub push_failures: u64,
    /// Records pulled in by `shake()`.
    pub pulls: u64,
    /// Last successful push or pull instant, if any.
    pub last_sync: Option<DateTime<Utc>>,
}

/// One peer entanglement.
pub struct Tangle<T> {
    peer: Arc<dyn Peer<T>>,
    mode: SyncMode,
    conflict_override: ConflictDirection,
    delta_sync: AtomicBool,
    disposed: AtomicBool,
    pushes: AtomicU64,
    push_failures: AtomicU64,
    pulls: AtomicU64,
    // Millis since epoch; i64::MIN means never.
    last_sync_ms: AtomicI64,
}

impl<T> Tangle<T> {
    /// Entangles `peer` with the given mode and defaults: judge-resolved
    /// conflicts, delta sync off.
    #[must_use]
    pub fn new(peer: Arc<dyn Peer<T>>, mode: SyncMode) -> Self {
        Self {
            peer,
            mode,
            conflict_override: ConflictDirection::UseJudge,
            delta_sync: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            pushes: AtomicU64::new(0),
            push_failures: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
            last_sync_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Sets the per-peer conflict override.
    #[must_use]
    pub fn with_conflict_override(mut self, direction: ConflictDirection) -> Self {
        self.conflict_override = direction;
        self
    }

    /// Enables delta sync for this tangle.
    #[must_use]
    pub fn with_delta_sync(self, enabled: bool) -> Self {
        self.delta_sync.store(enabled, Ordering::Relaxed);
        self
    }

    /// The node id behind this tangle's peer.
    #[must_use]
    pub fn remote_node_id(&self) -> String {
        self.peer.remote_node_id()
    }

    /// This tangle's sync mode.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// The per-peer conflict override.
    #[must_use]
    pub fn conflict_override(&self) -> ConflictDirection {
        self.conflict_override
    }

    /// Whether delta sync is enabled.
    #[must_use]
    pub fn delta_sync_enabled(&self) -> bool {
        self.delta_sync.load(Ordering::Relaxed)
    }

    /// Toggles delta sync.
    pub fn set_delta_sync(&self, enabled: bool) {
        self.delta_sync.store(enabled, Ordering::Relaxed);
    }

    /// Whether this tangle has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Disposes the tangle: all further operations fail with `Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TangleStatsSnapshot {
        let ms = self.last_sync_ms.load(Ordering::Relaxed);
        TangleStatsSnapshot {
            pushes: self.pushes.load(Ordering::Relaxed),
            push_failures: self.push_failures.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            last_sync: (ms != i64::MIN).then(|| {
                DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
            }),
        }
    }

    fn mark_synced(&self, now: DateTime<Utc>) {
        self.last_sync_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Pushes a delivery through this tangle. Failures are counted and
    /// logged, never propagated -- a local put must not fail because a peer
    /// is down.
    ///
    /// # Errors
    ///
    /// Only [`AcornError::Disposed`], when the tangle was already disposed.
    pub fn push(&self, delivery: &Delivery<T>, from_node: &str, now: DateTime<Utc>) -> Result<()>
    where
        T: Clone,
    {
        if self.is_disposed() {
            return Err(AcornError::Disposed("tangle"));
        }
        if !self.mode.pushes() {
            return Ok(());
        }

        match self.peer.deliver(delivery.clone(), from_node) {
            Ok(()) => {
                self.pushes.fetch_add(1, Ordering::Relaxed);
                self.mark_synced(now);
            }
            Err(err) => {
                self.push_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    peer = %self.peer.remote_node_id(),
                    error = %err,
                    "push to peer failed; continuing"
                );
            }
        }
        Ok(())
    }

    /// Pulls the peer's records for merging. Fetch failures are counted and
    /// reported as an empty pull.
    ///
    /// # Errors
    ///
    /// Only [`AcornError::Disposed`].
    pub fn pull(&self, now: DateTime<Utc>) -> Result<Vec<Record<T>>> {
        if self.is_disposed() {
            return Err(AcornError::Disposed("tangle"));
        }
        if !self.mode.pulls() {
            return Ok(Vec::new());
        }

        match self.peer.fetch_all() {
            Ok(records) => {
                self.pulls
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                self.mark_synced(now);
                Ok(records)
            }
            Err(err) => {
                self.push_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    peer = %self.peer.remote_node_id(),
                    error = %err,
                    "pull from peer failed; continuing"
                );
                Ok(Vec::new())
            }
        }
    }
}
