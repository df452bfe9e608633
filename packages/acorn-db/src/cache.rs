//! Cache eviction strategies for a collection's in-memory working set.
//!
//! The collection notifies its [`CacheStrategy`] on every insert
//! (`on_stash`), read (`on_crack`), and removal (`on_toss`), and asks it for
//! [`eviction_candidates`](CacheStrategy::eviction_candidates) whenever the
//! working set may have outgrown its bound. Eviction removes entries from
//! the cache only -- the backend keeps them, and a later read reloads and
//! repopulates.
//!
//! Two strategies ship: [`NoEviction`] (never evicts) and [`LruStrategy`]
//! (oldest last-access first, trimming to 90% of the configured maximum).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Declarative cache policy, resolved to a strategy at collection build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Keep everything in memory.
    #[default]
    NoEviction,
    /// Least-recently-used eviction over `max_size` entries.
    Lru {
        /// Upper bound on resident entries after eviction settles.
        max_size: usize,
    },
}

impl CachePolicy {
    /// Builds the strategy implementing this policy.
    #[must_use]
    pub fn build(self) -> Box<dyn CacheStrategy> {
        match self {
            Self::NoEviction => Box::new(NoEviction),
            Self::Lru { max_size } => Box::new(LruStrategy::new(max_size)),
        }
    }
}

/// Eviction policy over the collection cache.
///
/// Lives under the collection's cache lock; implementations need no
/// internal synchronization. Swapping strategies replaces the bookkeeping
/// wholesale -- access history does not migrate.
pub trait CacheStrategy: Send {
    /// Strategy name for logs and stats.
    fn name(&self) -> &'static str;

    /// Maximum resident entries, or `None` for unbounded.
    fn max_size(&self) -> Option<usize>;

    /// A record was inserted or replaced.
    fn on_stash(&mut self, id: &str, now: DateTime<Utc>);

    /// A record was read.
    fn on_crack(&mut self, id: &str, now: DateTime<Utc>);

    /// A record left the cache (delete or eviction).
    fn on_toss(&mut self, id: &str);

    /// Ids to evict, in eviction order, given the currently resident ids.
    ///
    /// Empty when the cache is within bounds.
    fn eviction_candidates(&self, resident: &[String]) -> Vec<String>;
}

/// Strategy that never evicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEviction;

impl CacheStrategy for NoEviction {
    fn name(&self) -> &'static str {
        "none"
    }

    fn max_size(&self) -> Option<usize> {
        None
    }

    fn on_stash(&mut self, _id: &str, _now: DateTime<Utc>) {}

    fn on_crack(&mut self, _id: &str, _now: DateTime<Utc>) {}

    fn on_toss(&mut self, _id: &str) {}

    fn eviction_candidates(&self, _resident: &[String]) -> Vec<String> {
        Vec::new()
    }
}

/// Least-recently-used eviction.
///
/// Tracks a last-access instant per id. When the resident set exceeds
/// `max_size`, candidates are produced oldest-first until the set would
/// shrink to 90% of the maximum (so a single overflowing insert does not
/// trigger an eviction per subsequent insert).
pub struct LruStrategy {
    max_size: usize,
    last_access: HashMap<String, DateTime<Utc>>,
}

impl LruStrategy {
    /// LRU bounded at `max_size` resident entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            last_access: HashMap::new(),
        }
    }

    /// Post-eviction target: 90% of max, rounded up, never below 1.
    fn target_size(&self) -> usize {
        ((self.max_size * 9).div_ceil(10)).max(1)
    }
}

impl CacheStrategy for LruStrategy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn max_size(&self) -> Option<usize> {
        Some(self.max_size)
    }

    fn on_stash(&mut self, id: &str, now: DateTime<Utc>) {
        self.last_access.insert(id.to_string(), now);
    }

    fn on_crack(&mut self, id: &str, now: DateTime<Utc>) {
        self.last_access.insert(id.to_string(), now);
    }

    fn on_toss(&mut self, id: &str) {
        self.last_access.remove(id);
    }

    fn eviction_candidates(&self, resident: &[String]) -> Vec<String> {
        if resident.len() <= self.max_size {
            return Vec::new();
        }
        let excess = resident.len() - self.target_size();

        let mut by_age: Vec<&String> = resident.iter().collect();
        // Ids the strategy never saw sort oldest; ties break by id for
        // deterministic eviction order.
        by_age.sort_by_key(|id| (self.last_access.get(*id).copied(), (*id).clone()));
        by_age.into_iter().take(excess).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(millis).expect("millis in range")
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn no_eviction_never_produces_candidates() {
        let strategy = NoEviction;
        let resident = ids(&["a", "b", "c", "d", "e"]);
        assert!(strategy.eviction_candidates(&resident).is_empty());
        assert_eq!(strategy.max_size(), None);
    }

    #[test]
    fn lru_within_bounds_is_quiet() {
        let mut lru = LruStrategy::new(3);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            lru.on_stash(id, at(i as i64 * 1_000));
        }
        assert!(lru.eviction_candidates(&ids(&["a", "b", "c"])).is_empty());
    }

    #[test]
    fn lru_evicts_the_least_recently_accessed() {
        let mut lru = LruStrategy::new(3);
        lru.on_stash("a", at(1_000));
        lru.on_stash("b", at(2_000));
        lru.on_stash("c", at(3_000));
        // Reading `a` refreshes it past `b`.
        lru.on_crack("a", at(4_000));
        lru.on_stash("d", at(5_000));

        let candidates = lru.eviction_candidates(&ids(&["a", "b", "c", "d"]));
        assert_eq!(candidates, vec!["b".to_string()]);
    }

    #[test]
    fn trims_to_ninety_percent_of_max() {
        let mut lru = LruStrategy::new(10);
        let resident: Vec<String> = (0..12).map(|i| format!("k{i:02}")).collect();
        for (i, id) in resident.iter().enumerate() {
            lru.on_stash(id, at(i as i64 * 1_000));
        }

        // 12 resident, max 10, target 9: evict the 3 oldest.
        let candidates = lru.eviction_candidates(&resident);
        assert_eq!(candidates, ids(&["k00", "k01", "k02"]));
    }

    #[test]
    fn unseen_ids_evict_first() {
        let mut lru = LruStrategy::new(2);
        lru.on_stash("seen-a", at(1_000));
        lru.on_stash("seen-b", at(2_000));

        let resident = ids(&["seen-a", "seen-b", "ghost"]);
        let candidates = lru.eviction_candidates(&resident);
        assert_eq!(candidates, vec!["ghost".to_string()]);
    }

    #[test]
    fn toss_forgets_access_history() {
        let mut lru = LruStrategy::new(2);
        lru.on_stash("a", at(1_000));
        lru.on_toss("a");
        assert!(lru.last_access.is_empty());
    }

    #[test]
    fn policy_builds_the_matching_strategy() {
        assert_eq!(CachePolicy::NoEviction.build().name(), "none");
        let lru = CachePolicy::Lru { max_size: 5 }.build();
        assert_eq!(lru.name(), "lru");
        assert_eq!(lru.max_size(), Some(5));
    }

    #[test]
    fn small_max_sizes_keep_a_sane_target() {
        // max 3: target is ceil(2.7) = 3, so one overflowing insert evicts
        // exactly one entry.
        let mut lru = LruStrategy::new(3);
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            lru.on_stash(id, at(i as i64 * 1_000));
        }
        let candidates = lru.eviction_candidates(&ids(&["a", "b", "c", "d"]));
        assert_eq!(candidates, vec!["a".to_string()]);
    }
}
