//! Scalar index: one property, ordered multimap of key -> ids.
//!
//! Supports point lookup, inclusive range scans, full ordered listing, and
//! min/max, all off one `BTreeMap`. A reverse map (id -> key) makes removal
//! and replace-on-put O(log n) without rescanning. Optional flags: `unique`
//! (a value may map to at most one id) and `case_insensitive` (string keys
//! fold before comparing).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use acorn_core::{AcornError, Result};

use super::key::{extract_path, IndexKey};
use super::{AcornIndex, IndexKind, IndexState, IndexStats};

/// Builds the conventional index name for a type's property.
#[must_use]
pub fn default_index_name(type_name: &str, property: &str) -> String {
    // Only the terminal segment of paths like `my_crate::model::User`.
    let short_type = type_name.rsplit("::").next().unwrap_or(type_name);
    format!("IX_{short_type}_{property}")
}

/// Configuration for a scalar index.
#[derive(Debug, Clone)]
pub struct ScalarIndexSpec {
    /// Dotted property path to index.
    pub property: String,
    /// Reject two ids under one key value.
    pub unique: bool,
    /// Fold string keys before comparing.
    pub case_insensitive: bool,
    /// Storage-engine-backed marker; the planner discounts native indexes.
    pub native: bool,
    /// Custom name; defaults to `IX_{Type}_{Property}`.
    pub name: Option<String>,
}

impl ScalarIndexSpec {
    /// Plain (non-unique, case-sensitive) index on `property`.
    #[must_use]
    pub fn on(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            unique: false,
            case_insensitive: false,
            native: false,
            name: None,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Folds string keys.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Marks the index native.
    #[must_use]
    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// Overrides the default name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Ordered single-property index.
pub struct ScalarIndex {
    name: String,
    properties: [String; 1],
    unique: bool,
    case_insensitive: bool,
    native: bool,
    state: IndexState,
    by_key: BTreeMap<IndexKey, BTreeSet<String>>,
    key_of: HashMap<String, IndexKey>,
}

impl ScalarIndex {
    /// Builds an index from its spec, naming it for `type_name` unless the
    /// spec carries a custom name.
    #[must_use]
    pub fn from_spec(spec: &ScalarIndexSpec, type_name: &str) -> Self {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| default_index_name(type_name, &spec.property));
        Self {
            name,
            properties: [spec.property.clone()],
            unique: spec.unique,
            case_insensitive: spec.case_insensitive,
            native: spec.native,
            state: IndexState::Ready,
            by_key: BTreeMap::new(),
            key_of: HashMap::new(),
        }
    }

    fn key_for(&self, doc: &serde_json::Value) -> IndexKey {
        let key = extract_path(doc, &self.properties[0]);
        if self.case_insensitive {
            key.fold_case()
        } else {
            key
        }
    }

    fn normalize(&self, key: &IndexKey) -> IndexKey {
        if self.case_insensitive {
            key.clone().fold_case()
        } else {
            key.clone()
        }
    }

    fn ids_under(&self, key: &IndexKey) -> Vec<String> {
        self.by_key
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl AcornIndex for ScalarIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Scalar
    }

    fn properties(&self) -> &[String] {
        &self.properties
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn is_native(&self) -> bool {
        self.native
    }

    fn state(&self) -> IndexState {
        self.state
    }

    fn set_state(&mut self, state: IndexState) {
        self.state = state;
    }

    fn check_violation(&self, id: &str, doc: &serde_json::Value) -> Result<()> {
        if !self.unique {
            return Ok(());
        }
        let key = self.key_for(doc);
        if let Some(ids) = self.by_key.get(&key) {
            if let Some(existing) = ids.iter().find(|existing| existing.as_str() != id) {
                return Err(AcornError::UniqueIndexViolation {
                    index: self.name.clone(),
                    value: key.to_string(),
                    existing_id: existing.clone(),
                });
            }
        }
        Ok(())
    }

    fn add(&mut self, id: &str, doc: &serde_json::Value) -> Result<()> {
        self.check_violation(id, doc)?;
        self.remove(id);
        let key = self.key_for(doc);
        self.by_key
            .entry(key.clone())
            .or_default()
            .insert(id.to_string());
        self.key_of.insert(id.to_string(), key);
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        if let Some(old_key) = self.key_of.remove(id) {
            if let Some(ids) = self.by_key.get_mut(&old_key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_key.remove(&old_key);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.by_key.clear();
        self.key_of.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats::of(self.key_of.len(), self.by_key.len())
    }

    fn lookup(&self, components: &[IndexKey]) -> Vec<String> {
        match components {
            [key] => self.ids_under(&self.normalize(key)),
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
        let min = min.map(|k| self.normalize(k));
        let max = max.map(|k| self.normalize(k));
        let mut out = Vec::new();
        for (key, ids) in &self.by_key {
            if min.as_ref().is_some_and(|m| key < m) {
                continue;
            }
            if max.as_ref().is_some_and(|m| key > m) {
                break;
            }
            out.extend(ids.iter().cloned());
        }
        out
    }

    fn sorted_ids(&self, ascending: bool) -> Vec<String> {
        let mut out = Vec::with_capacity(self.key_of.len());
        if ascending {
            for ids in self.by_key.values() {
                out.extend(ids.iter().cloned());
            }
        } else {
            for ids in self.by_key.values().rev() {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    fn min_key(&self) -> Option<IndexKey> {
        self.by_key.keys().next().cloned()
    }

    fn max_key(&self) -> Option<IndexKey> {
        self.by_key.keys().next_back().cloned()
    }
}
