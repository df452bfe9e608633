//! The always-present identity index: id -> id.
//!
//! Point lookups are O(1) set membership; the ordered listing is O(n) off
//! the maintained `BTreeSet`. Unique by construction -- replacing an id
//! with itself can never collide -- so `check_violation` always passes.

use std::collections::BTreeSet;

use acorn_core::Result;

use super::key::IndexKey;
use super::{AcornIndex, IndexKind, IndexState, IndexStats};

/// Conventional name of the identity index.
pub const IDENTITY_INDEX_NAME: &str = "IX_Identity";

/// Unique id -> id index.
pub struct IdentityIndex {
    ids: BTreeSet<String>,
    properties: [String; 1],
    state: IndexState,
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityIndex {
    /// Empty identity index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: BTreeSet::new(),
            properties: ["id".to_string()],
            state: IndexState::Ready,
        }
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

impl AcornIndex for IdentityIndex {
    fn name(&self) -> &str {
        IDENTITY_INDEX_NAME
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Identity
    }

    fn properties(&self) -> &[String] {
        &self.properties
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn state(&self) -> IndexState {
        self.state
    }

    fn set_state(&mut self, state: IndexState) {
        self.state = state;
    }

    fn check_violation(&self, _id: &str, _doc: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn add(&mut self, id: &str, _doc: &serde_json::Value) -> Result<()> {
        self.ids.insert(id.to_string());
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        self.ids.remove(id);
    }

    fn clear(&mut self) {
        self.ids.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats::of(self.ids.len(), self.ids.len())
    }

    fn lookup(&self, components: &[IndexKey]) -> Vec<String> {
        match components {
            [IndexKey::Str(id)] if self.ids.contains(id) => vec![id.clone()],
            _ => Vec::new(),
        }
    }

    fn prefix_lookup(&self, components: &[IndexKey]) -> Vec<String> {
        if components.is_empty() {
            self.sorted_ids(true)
        } else {
            self.lookup(components)
        }
    }

    fn range(
        &self,
        _prefix: &[IndexKey],
        min: Option<&IndexKey>,
        max: Option<&IndexKey>,
    ) -> Vec<String> {
        self.ids
            .iter()
            .filter(|id| {
                let key = IndexKey::string((*id).clone());
                min.is_none_or(|m| &key >= m) && max.is_none_or(|m| &key <= m)
            })
            .cloned()
            .collect()
    }

    fn sorted_ids(&self, ascending: bool) -> Vec<String> {
        if ascending {
            self.ids.iter().cloned().collect()
        } else {
            self.ids.iter().rev().cloned().collect()
        }
    }

    fn min_key(&self) -> Option<IndexKey> {
        self.ids.first().map(|id| IndexKey::string(id.clone()))
    }

    fn max_key(&self) -> Option<IndexKey> {
        self.ids.last().map(|id| IndexKey::string(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> IdentityIndex {
        let mut index = IdentityIndex::new();
        for id in ["cedar", "acorn", "birch"] {
            index.add(id, &serde_json::Value::Null).expect("add");
        }
        index
    }

    #[test]
    fn lookup_finds_only_present_ids() {
        let index = populated();
        assert_eq!(index.lookup(&[IndexKey::string("acorn")]), vec!["acorn"]);
        assert!(index.lookup(&[IndexKey::string("walnut")]).is_empty());
    }

    #[test]
    fn sorted_listing_is_ordered_both_ways() {
        let index = populated();
        assert_eq!(index.sorted_ids(true), vec!["acorn", "birch", "cedar"]);
        assert_eq!(index.sorted_ids(false), vec!["cedar", "birch", "acorn"]);
    }

    #[test]
    fn stats_are_fully_selective() {
        let index = populated();
        let stats = index.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.unique_values, 3);
        assert!((stats.selectivity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn remove_and_clear_shrink_the_index() {
        let mut index = populated();
        index.remove("birch");
        assert!(!index.contains("birch"));
        assert_eq!(index.stats().entries, 2);

        index.clear();
        assert_eq!(index.stats().entries, 0);
    }

    #[test]
    fn re_adding_an_id_is_idempotent() {
        let mut index = populated();
        index.add("acorn", &serde_json::Value::Null).expect("re-add");
        assert_eq!(index.stats().entries, 3);
    }

    #[test]
    fn min_and_max_track_the_extremes() {
        let index = populated();
        assert_eq!(index.min_key(), Some(IndexKey::string("acorn")));
        assert_eq!(index.max_key(), Some(IndexKey::string("cedar")));
        assert_eq!(IdentityIndex::new().min_key(), None);
    }
}
