//! The grove: a registry of collections keyed by type tag.
//!
//! Generic collections cannot live together in one map, so the grove holds
//! [`CollectionHandle`]s: a non-generic vtable of JSON-typed operations
//! plus the type-erased concrete collection for same-type retrieval. Plant
//! by type, retrieve by type; embedders (and the FFI shim) work a handle's
//! JSON operations without ever naming the payload type.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use acorn_core::Result;

use crate::collection::{Collection, Document};

/// Erased operation surface of a collection.
pub trait AnyCollection: Send + Sync {
    /// Tag identifying the payload type (the Rust type path by default).
    fn type_tag(&self) -> &'static str;

    /// Node id of the underlying collection.
    fn node_id(&self) -> String;

    /// Stores a JSON payload under `id`.
    ///
    /// # Errors
    ///
    /// `Corrupt` when the payload does not deserialize into the collection's
    /// type, plus everything `put_with_id` can raise.
    fn put_json(&self, id: &str, payload: &[u8]) -> Result<()>;

    /// Fetches the payload for `id` as JSON bytes.
    ///
    /// # Errors
    ///
    /// As the typed `get`.
    fn get_json(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes `id`; returns whether a record existed.
    ///
    /// # Errors
    ///
    /// As the typed `delete`.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Number of records resident in the cache.
    fn count(&self) -> usize;

    /// Every live record as a JSON array of wire envelopes.
    ///
    /// # Errors
    ///
    /// Serialization failures.
    fn export_json(&self) -> Result<Vec<u8>>;

    /// Disposes the underlying collection.
    fn dispose(&self);
}

impl<T: Document> AnyCollection for Collection<T> {
    fn type_tag(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn node_id(&self) -> String {
        Collection::node_id(self).to_string()
    }

    fn put_json(&self, id: &str, payload: &[u8]) -> Result<()> {
        let doc: T = serde_json::from_slice(payload)?;
        self.put_with_id(id, doc)
    }

    fn get_json(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match self.get(id)? {
            Some(doc) => Ok(Some(serde_json::to_vec(&doc)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Collection::delete(self, id)
    }

    fn count(&self) -> usize {
        Collection::count(self)
    }

    fn export_json(&self) -> Result<Vec<u8>> {
        let mut envelopes = Vec::new();
        for record in self.export_changes() {
            envelopes.push(record.to_stored()?);
        }
        Ok(serde_json::to_vec(&envelopes)?)
    }

    fn dispose(&self) {
        Collection::dispose(self);
    }
}

/// Non-generic handle to a planted collection.
#[derive(Clone)]
pub struct CollectionHandle {
    ops: Arc<dyn AnyCollection>,
    concrete: Arc<dyn Any + Send + Sync>,
}

impl CollectionHandle {
    /// Wraps a typed collection.
    #[must_use]
    pub fn new<T: Document>(collection: Collection<T>) -> Self {
        let ops: Arc<dyn AnyCollection> = Arc::new(collection.clone());
        Self {
            ops,
            concrete: Arc::new(collection),
        }
    }

    /// The erased operation surface.
    #[must_use]
    pub fn ops(&self) -> &dyn AnyCollection {
        self.ops.as_ref()
    }

    /// Recovers the typed collection, if `T` matches the planted type.
    #[must_use]
    pub fn typed<T: Document>(&self) -> Option<Collection<T>> {
        self.concrete.downcast_ref::<Collection<T>>().cloned()
    }
}

/// Registry of collections, one per type tag.
#[derive(Default)]
pub struct Grove {
    handles: DashMap<String, CollectionHandle>,
}

impl Grove {
    /// Empty grove.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plants a collection under its type tag, returning the previous
    /// occupant of the tag if any.
    pub fn plant<T: Document>(&self, collection: Collection<T>) -> Option<CollectionHandle> {
        let tag = std::any::type_name::<T>().to_string();
        self.plant_as(tag, collection)
    }

    /// Plants a collection under an explicit tag.
    pub fn plant_as<T: Document>(
        &self,
        tag: impl Into<String>,
        collection: Collection<T>,
    ) -> Option<CollectionHandle> {
        self.handles
            .insert(tag.into(), CollectionHandle::new(collection))
    }

    /// Handle for a tag.
    #[must_use]
    pub fn handle(&self, tag: &str) -> Option<CollectionHandle> {
        self.handles.get(tag).map(|h| h.clone())
    }

    /// Typed retrieval under the type's own tag.
    #[must_use]
    pub fn collection<T: Document>(&self) -> Option<Collection<T>> {
        self.handle(std::any::type_name::<T>())
            .and_then(|h| h.typed::<T>())
    }

    /// Removes a planted collection, disposing it.
    pub fn uproot(&self, tag: &str) -> bool {
        match self.handles.remove(tag) {
            Some((_, handle)) => {
                handle.ops().dispose();
                true
            }
            None => false,
        }
    }

    /// All registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }

    /// Number of planted collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when nothing is planted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Disposes and removes every planted collection.
    pub fn dispose_all(&self) {
        let tags = self.tags();
        for tag in tags {
            self.uproot(&tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::backend::memory::MemoryBackend;
    use crate::builder::CollectionBuilder;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Squirrel {
        id: String,
        nuts: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Oak {
        id: String,
        rings: u32,
    }

    fn open<T: Document>(node: &str) -> Collection<T> {
        CollectionBuilder::new(Box::new(MemoryBackend::new()))
            .node_id(node)
            .without_sweeper()
            .open()
            .expect("open")
    }

    #[test]
    fn plant_by_type_retrieve_by_type() {
        let grove = Grove::new();
        grove.plant(open::<Squirrel>("n1"));
        grove.plant(open::<Oak>("n2"));

        let squirrels = grove.collection::<Squirrel>().expect("planted");
        squirrels
            .put(Squirrel {
                id: "s1".to_string(),
                nuts: 3,
            })
            .expect("put");

        // Same engine through a second retrieval.
        assert_eq!(grove.collection::<Squirrel>().expect("again").count(), 1);
        assert_eq!(grove.collection::<Oak>().expect("planted").count(), 0);
        assert_eq!(grove.len(), 2);
    }

    #[test]
    fn handles_expose_json_operations() {
        let grove = Grove::new();
        grove.plant_as("squirrels", open::<Squirrel>("n1"));
        let handle = grove.handle("squirrels").expect("handle");

        handle
            .ops()
            .put_json("s1", br#"{"id":"s1","nuts":9}"#)
            .expect("put");
        let fetched = handle.ops().get_json("s1").expect("get").expect("present");
        let doc: Squirrel = serde_json::from_slice(&fetched).expect("json");
        assert_eq!(doc.nuts, 9);

        let exported = handle.ops().export_json().expect("export");
        let envelopes: Vec<serde_json::Value> =
            serde_json::from_slice(&exported).expect("array");
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0]["id"], "s1");

        assert!(handle.ops().delete("s1").expect("delete"));
        assert_eq!(handle.ops().count(), 0);
    }

    #[test]
    fn malformed_json_is_rejected_not_stored() {
        let grove = Grove::new();
        grove.plant_as("squirrels", open::<Squirrel>("n1"));
        let handle = grove.handle("squirrels").expect("handle");

        let err = handle.ops().put_json("s1", b"{broken").unwrap_err();
        assert!(matches!(err, acorn_core::AcornError::Corrupt(_)));
        assert_eq!(handle.ops().count(), 0);
    }

    #[test]
    fn typed_retrieval_checks_the_type() {
        let grove = Grove::new();
        grove.plant_as("generic-tag", open::<Squirrel>("n1"));
        let handle = grove.handle("generic-tag").expect("handle");
        assert!(handle.typed::<Squirrel>().is_some());
        assert!(handle.typed::<Oak>().is_none());
    }

    #[test]
    fn uproot_disposes_the_collection() {
        let grove = Grove::new();
        let planted = open::<Squirrel>("n1");
        grove.plant(planted.clone());

        assert!(grove.uproot(std::any::type_name::<Squirrel>()));
        assert!(planted.is_disposed());
        assert!(grove.is_empty());
        assert!(!grove.uproot("nothing-here"));
    }

    #[test]
    fn dispose_all_clears_the_grove() {
        let grove = Grove::new();
        grove.plant(open::<Squirrel>("n1"));
        grove.plant(open::<Oak>("n2"));
        grove.dispose_all();
        assert!(grove.is_empty());
    }
}
