//! Secondary indexes over a collection's documents.
//!
//! Every collection carries an [`IdentityIndex`](identity::IdentityIndex)
//! (id -> id, unique, always present) plus any number of
//! [`ScalarIndex`](scalar::ScalarIndex)es (one property) and
//! [`CompositeIndex`](composite::CompositeIndex)es (property tuple, ordered
//! lexicographically). Indexes operate on the document's JSON projection --
//! the same `serde_json::Value` the write path already produces -- keyed by
//! dotted property paths.
//!
//! The [`IndexManager`](manager::IndexManager) keeps every index current on
//! put/delete, enforces unique constraints atomically (checks run before
//! any mutation anywhere), and rebuilds from a cache snapshot on demand.

pub mod composite;
pub mod identity;
pub mod key;
pub mod manager;
pub mod scalar;

pub use key::{extract_path, IndexKey};

use acorn_core::Result;

/// What kind of index this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// The always-present id -> id index.
    Identity,
    /// One property, ordered multimap.
    Scalar,
    /// Property tuple, ordered lexicographically.
    Composite,
}

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// A rebuild is in progress; contents are incomplete.
    Building,
    /// Fully populated and usable.
    Ready,
    /// A rebuild aborted; contents are unreliable.
    Failed,
}

/// Size and selectivity statistics, consumed by the query planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    /// Indexed ids.
    pub entries: usize,
    /// Distinct key values.
    pub unique_values: usize,
    /// `unique_values / entries`; 1.0 means every entry is distinct,
    /// 0.0 an empty index.
    pub selectivity: f64,
}

impl IndexStats {
    /// Stats from entry and distinct-value counts.
    #[must_use]
    pub fn of(entries: usize, unique_values: usize) -> Self {
        let selectivity = if entries == 0 {
            0.0
        } else {
            // Both counts are bounded by memory-resident entries, far below
            // f64's exact integer range.
            #[allow(clippy::cast_precision_loss)]
            {
                unique_values as f64 / entries as f64
            }
        };
        Self {
            entries,
            unique_values,
            selectivity,
        }
    }
}

/// Common surface of every index, object-safe for `Box<dyn AcornIndex>`.
///
/// The multi-component operations take key slices; scalar indexes use
/// single-element slices and the identity index a single id key.
pub trait AcornIndex: Send {
    /// Index name, unique within a collection.
    fn name(&self) -> &str;

    /// What kind of index this is.
    fn kind(&self) -> IndexKind;

    /// Property paths this index covers, in order.
    fn properties(&self) -> &[String];

    /// Whether a key value may map to at most one id.
    fn is_unique(&self) -> bool;

    /// Whether the storage engine backs this index natively (the planner
    /// discounts native indexes).
    fn is_native(&self) -> bool {
        false
    }

    /// Current lifecycle state.
    fn state(&self) -> IndexState;

    /// Sets the lifecycle state (driven by the manager during rebuilds).
    fn set_state(&mut self, state: IndexState);

    /// Checks whether adding `(id, doc)` would violate a unique constraint,
    /// without mutating anything.
    ///
    /// # Errors
    ///
    /// `UniqueIndexViolation` naming this index, the colliding value, and
    /// the id that already holds it.
    fn check_violation(&self, id: &str, doc: &serde_json::Value) -> Result<()>;

    /// Indexes `(id, doc)`, replacing any previous entry for `id`.
    ///
    /// # Errors
    ///
    /// `UniqueIndexViolation` under the same conditions as
    /// [`check_violation`](Self::check_violation).
    fn add(&mut self, id: &str, doc: &serde_json::Value) -> Result<()>;

    /// Removes the entry for `id`, if any.
    fn remove(&mut self, id: &str);

    /// Drops all entries.
    fn clear(&mut self);

    /// Entry and distinct-value counts.
    fn stats(&self) -> IndexStats;

    /// Ids whose key equals `components` exactly.
    fn lookup(&self, components: &[IndexKey]) -> Vec<String>;

    /// Ids whose key starts with `components` (possibly empty), in key
    /// order.
    fn prefix_lookup(&self, components: &[IndexKey]) -> Vec<String>;

    /// Ids whose key matches `prefix` on the leading components and falls
    /// inclusively between `min` and `max` on the next one. Open bounds use
    /// the index extremes.
    fn range(
        &self,
        prefix: &[IndexKey],
        min: Option<&IndexKey>,
        max: Option<&IndexKey>,
    ) -> Vec<String>;

    /// All ids ordered by key; ties within one key order by id.
    fn sorted_ids(&self, ascending: bool) -> Vec<String>;

    /// Smallest key present, if any (last component for composites).
    fn min_key(&self) -> Option<IndexKey>;

    /// Largest key present, if any (last component for composites).
    fn max_key(&self) -> Option<IndexKey>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_selectivity_is_unique_over_entries() {
        let stats = IndexStats::of(10, 4);
        assert!((stats.selectivity - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_stats_have_zero_selectivity() {
        let stats = IndexStats::of(0, 0);
        assert!((stats.selectivity - 0.0).abs() < f64::EPSILON);
    }

    /// Verifies `Box<dyn AcornIndex>` compiles (object safety).
    #[test]
    fn index_trait_is_object_safe() {
        fn _assert_object_safe(_: &Box<dyn AcornIndex>) {}
    }
}
