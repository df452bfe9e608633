//! Composite index: a property tuple ordered lexicographically.
//!
//! Keys are vectors of [`IndexKey`] extracted in spec order, compared
//! component-wise. Supports exact lookup on the full tuple, prefix lookup
//! on the leading k components (zero components lists everything in tuple
//! order), and range scans on the component following a fixed prefix.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use acorn_core::{AcornError, Result};

use super::key::{extract_path, IndexKey};
use super::{AcornIndex, IndexKind, IndexState, IndexStats};

/// Configuration for a composite index.
#[derive(Debug, Clone)]
pub struct CompositeIndexSpec {
    /// Dotted property paths, in tuple order.
    pub properties: Vec<String>,
    /// Reject two ids under one tuple value.
    pub unique: bool,
    /// Storage-engine-backed marker.
    pub native: bool,
    /// Custom name; defaults to `IX_{Type}_{p1}_{p2}…`.
    pub name: Option<String>,
}

impl CompositeIndexSpec {
    /// Plain composite index over `properties`.
    #[must_use]
    pub fn on<S: Into<String>>(properties: impl IntoIterator<Item = S>) -> Self {
        Self {
            properties: properties.into_iter().map(Into::into).collect(),
            unique: false,
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

/// Lexicographically ordered multi-property index.
pub struct CompositeIndex {
    name: String,
    properties: Vec<String>,
    unique: bool,
    native: bool,
    state: IndexState,
    by_tuple: BTreeMap<Vec<IndexKey>, BTreeSet<String>>,
    tuple_of: HashMap<String, Vec<IndexKey>>,
}

impl CompositeIndex {
    /// Builds an index from its spec, naming it for `type_name` unless the
    /// spec carries a custom name.
    #[must_use]
    pub fn from_spec(spec: &CompositeIndexSpec, type_name: &str) -> Self {
        let name = spec.name.clone().unwrap_or_else(|| {
            let short_type = type_name.rsplit("::").next().unwrap_or(type_name);
            let mut name = format!("IX_{short_type}");
            for property in &spec.properties {
                name.push('_');
                name.push_str(property);
            }
            name
        });
        Self {
            name,
            properties: spec.properties.clone(),
            unique: spec.unique,
            native: spec.native,
            state: IndexState::Ready,
            by_tuple: BTreeMap::new(),
            tuple_of: HashMap::new(),
        }
    }

    fn tuple_for(&self, doc: &serde_json::Value) -> Vec<IndexKey> {
        self.properties
            .iter()
            .map(|p| extract_path(doc, p))
            .collect()
    }

    /// Entries whose tuple starts with `prefix`, in tuple order.
    fn matching_prefix<'a>(
        &'a self,
        prefix: &'a [IndexKey],
    ) -> impl Iterator<Item = (&'a Vec<IndexKey>, &'a BTreeSet<String>)> + 'a {
        self.by_tuple
            .range(prefix.to_vec()..)
            .take_while(move |(tuple, _)| tuple.starts_with(prefix))
    }
}

impl AcornIndex for CompositeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Composite
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
        let tuple = self.tuple_for(doc);
        if let Some(ids) = self.by_tuple.get(&tuple) {
            if let Some(existing) = ids.iter().find(|existing| existing.as_str() != id) {
                let rendered: Vec<String> = tuple.iter().map(ToString::to_string).collect();
                return Err(AcornError::UniqueIndexViolation {
                    index: self.name.clone(),
                    value: format!("({})", rendered.join(", ")),
                    existing_id: existing.clone(),
                });
            }
        }
        Ok(())
    }

    fn add(&mut self, id: &str, doc: &serde_json::Value) -> Result<()> {
        self.check_violation(id, doc)?;
        self.remove(id);
        let tuple = self.tuple_for(doc);
        self.by_tuple
            .entry(tuple.clone())
            .or_default()
            .insert(id.to_string());
        self.tuple_of.insert(id.to_string(), tuple);
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        if let Some(old_tuple) = self.tuple_of.remove(id) {
            if let Some(ids) = self.by_tuple.get_mut(&old_tuple) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_tuple.remove(&old_tuple);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.by_tuple.clear();
        self.tuple_of.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats::of(self.tuple_of.len(), self.by_tuple.len())
    }

    fn lookup(&self, components: &[IndexKey]) -> Vec<String> {
        if components.len() != self.properties.len() {
            return Vec::new();
        }
        self.by_tuple
            .get(components)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn prefix_lookup(&self, components: &[IndexKey]) -> Vec<String> {
        let mut out = Vec::new();
        for (_, ids) in self.matching_prefix(components) {
            out.extend(ids.iter().cloned());
        }
        out
    }

    fn range(
        &self,
        prefix: &[IndexKey],
        min: Option<&IndexKey>,
        max: Option<&IndexKey>,
    ) -> Vec<String> {
        let position = prefix.len();
        let mut out = Vec::new();
        for (tuple, ids) in self.matching_prefix(prefix) {
            let Some(component) = tuple.get(position) else {
                continue;
            };
            if min.is_some_and(|m| component < m) {
                continue;
            }
            if max.is_some_and(|m| component > m) {
                // Tuples are ordered, so later ones only grow.
                break;
            }
            out.extend(ids.iter().cloned());
        }
        out
    }

    fn sorted_ids(&self, ascending: bool) -> Vec<String> {
        let mut out = Vec::with_capacity(self.tuple_of.len());
        if ascending {
            for ids in self.by_tuple.values() {
                out.extend(ids.iter().cloned());
            }
        } else {
            for ids in self.by_tuple.values().rev() {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    fn min_key(&self) -> Option<IndexKey> {
        self.by_tuple
            .keys()
            .next()
            .and_then(|tuple| tuple.last().cloned())
    }

    fn max_key(&self) -> Option<IndexKey> {
        self.by_tuple
            .keys()
            .next_back()
            .and_then(|tuple| tuple.last().cloned())
    }
}
