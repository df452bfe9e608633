//! Collection-level counters.
//!
//! All counters are relaxed atomics: they are observability, not control
//! flow. [`CollectionStats::snapshot`] returns a plain copy for callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a collection.
#[derive(Debug, Default)]
pub struct CollectionStats {
    puts: AtomicU64,
    gets: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    conflicts_resolved: AtomicU64,
    corrupt_skipped: AtomicU64,
    deliveries_applied: AtomicU64,
    deliveries_deduped: AtomicU64,
    tracked_change_ids: AtomicU64,
    subscriber_notifications: AtomicU64,
}

macro_rules! counter {
    ($bump:ident, $read:ident, $field:ident) => {
        pub(crate) fn $bump(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        /// Current value of the counter.
        #[must_use]
        pub fn $read(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl CollectionStats {
    counter!(bump_puts, puts, puts);
    counter!(bump_gets, gets, gets);
    counter!(bump_cache_hits, cache_hits, cache_hits);
    counter!(bump_cache_misses, cache_misses, cache_misses);
    counter!(bump_deletes, deletes, deletes);
    counter!(bump_conflicts_resolved, conflicts_resolved, conflicts_resolved);
    counter!(bump_corrupt_skipped, corrupt_skipped, corrupt_skipped);
    counter!(bump_deliveries_applied, deliveries_applied, deliveries_applied);
    counter!(bump_deliveries_deduped, deliveries_deduped, deliveries_deduped);
    counter!(bump_tracked_change_ids, tracked_change_ids, tracked_change_ids);
    counter!(
        bump_subscriber_notifications,
        subscriber_notifications,
        subscriber_notifications
    );

    pub(crate) fn add_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    /// Records evicted from cache so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub(crate) fn add_expirations(&self, n: u64) {
        self.expirations.fetch_add(n, Ordering::Relaxed);
    }

    /// Records removed by TTL enforcement so far.
    #[must_use]
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Plain copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            puts: self.puts(),
            gets: self.gets(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            deletes: self.deletes(),
            evictions: self.evictions(),
            expirations: self.expirations(),
            conflicts_resolved: self.conflicts_resolved(),
            corrupt_skipped: self.corrupt_skipped(),
            deliveries_applied: self.deliveries_applied(),
            deliveries_deduped: self.deliveries_deduped(),
            tracked_change_ids: self.tracked_change_ids(),
            subscriber_notifications: self.subscriber_notifications(),
        }
    }
}

/// Copyable view of a collection's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub conflicts_resolved: u64,
    pub corrupt_skipped: u64,
    pub deliveries_applied: u64,
    pub deliveries_deduped: u64,
    pub tracked_change_ids: u64,
    pub subscriber_notifications: u64,
}
