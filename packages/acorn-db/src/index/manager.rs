//! Index manager: keeps every index current and unique checks atomic.
//!
//! Owned by the collection and mutated under its cache lock. The critical
//! contract is atomic rejection: on put, **all** unique checks run before
//! **any** index (or the cache, or the backend) is touched, so a violation
//! leaves the collection exactly as it was.

use acorn_core::Result;

use super::identity::IdentityIndex;
use super::{AcornIndex, IndexState};

/// The collection's index set: the identity index plus user-defined ones.
pub struct IndexManager {
    indexes: Vec<Box<dyn AcornIndex>>,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    /// Manager holding only the identity index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indexes: vec![Box::new(IdentityIndex::new())],
        }
    }

    /// Registers a user-defined index.
    pub fn register(&mut self, index: Box<dyn AcornIndex>) {
        self.indexes.push(index);
    }

    /// All indexes, identity first.
    #[must_use]
    pub fn all(&self) -> &[Box<dyn AcornIndex>] {
        &self.indexes
    }

    /// Looks an index up by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&dyn AcornIndex> {
        self.indexes
            .iter()
            .find(|i| i.name() == name)
            .map(AsRef::as_ref)
    }

    /// Number of indexes, including identity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Always false: the identity index is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Runs every unique check for `(id, doc)` without mutating anything.
    ///
    /// # Errors
    ///
    /// The first `UniqueIndexViolation` found.
    pub fn check_violations(&self, id: &str, doc: &serde_json::Value) -> Result<()> {
        for index in &self.indexes {
            index.check_violation(id, doc)?;
        }
        Ok(())
    }

    /// Indexes `(id, doc)` in every index, replacing stale entries.
    ///
    /// Call [`check_violations`](Self::check_violations) first; this method
    /// assumes the checks passed and treats a late violation as a bug.
    ///
    /// # Errors
    ///
    /// Propagates the violation if one slips through anyway (concurrent
    /// mutation under a broken lock discipline).
    pub fn apply(&mut self, id: &str, doc: &serde_json::Value) -> Result<()> {
        for index in &mut self.indexes {
            index.add(id, doc)?;
        }
        Ok(())
    }

    /// Removes `id` from every index.
    pub fn remove(&mut self, id: &str) {
        for index in &mut self.indexes {
            index.remove(id);
        }
    }

    /// Clears and repopulates every index from a cache snapshot.
    ///
    /// Indexes pass through `Building` while repopulating; an index whose
    /// rebuild fails (a unique violation surfaced by changed data) is marked
    /// `Failed` and left empty rather than half-full.
    pub fn rebuild_all(&mut self, snapshot: &[(String, serde_json::Value)]) {
        for index in &mut self.indexes {
            index.set_state(IndexState::Building);
            index.clear();

            let mut failed = false;
            for (id, doc) in snapshot {
                if let Err(err) = index.add(id, doc) {
                    tracing::warn!(
                        index = %index.name(),
                        error = %err,
                        "index rebuild failed; marking index as failed"
                    );
                    index.clear();
                    failed = true;
                    break;
                }
            }
            index.set_state(if failed {
                IndexState::Failed
            } else {
                IndexState::Ready
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::scalar::{ScalarIndex, ScalarIndexSpec};
    use super::super::IndexKey;
    use super::*;

    fn doc(email: &str, age: i64) -> serde_json::Value {
        serde_json::json!({ "email": email, "age": age })
    }

    fn manager_with_unique_email() -> IndexManager {
        let mut manager = IndexManager::new();
        manager.register(Box::new(ScalarIndex::from_spec(
            &ScalarIndexSpec::on("email").unique(),
            "User",
        )));
        manager.register(Box::new(ScalarIndex::from_spec(
            &ScalarIndexSpec::on("age"),
            "User",
        )));
        manager
    }

    #[test]
    fn apply_updates_every_index() {
        let mut manager = manager_with_unique_email();
        manager.check_violations("1", &doc("a@x", 30)).expect("check");
        manager.apply("1", &doc("a@x", 30)).expect("apply");

        let email = manager.find("IX_User_email").expect("email index");
        assert_eq!(email.lookup(&[IndexKey::string("a@x")]), vec!["1"]);
        let age = manager.find("IX_User_age").expect("age index");
        assert_eq!(age.lookup(&[IndexKey::number(30.0)]), vec!["1"]);
    }

    #[test]
    fn violation_check_is_side_effect_free() {
        let mut manager = manager_with_unique_email();
        manager.apply("1", &doc("a@x", 30)).expect("apply");

        let err = manager.check_violations("2", &doc("a@x", 99)).unwrap_err();
        assert!(matches!(
            err,
            acorn_core::AcornError::UniqueIndexViolation { .. }
        ));

        // Neither the age index nor anything else saw id 2.
        let age = manager.find("IX_User_age").expect("age index");
        assert!(age.lookup(&[IndexKey::number(99.0)]).is_empty());
        assert_eq!(age.stats().entries, 1);
    }

    #[test]
    fn remove_clears_the_id_everywhere() {
        let mut manager = manager_with_unique_email();
        manager.apply("1", &doc("a@x", 30)).expect("apply");
        manager.remove("1");

        for index in manager.all() {
            assert_eq!(index.stats().entries, 0, "{}", index.name());
        }
    }

    #[test]
    fn rebuild_repopulates_from_a_snapshot() {
        let mut manager = manager_with_unique_email();
        manager.apply("stale", &doc("old@x", 1)).expect("apply");

        let snapshot = vec![
            ("1".to_string(), doc("a@x", 30)),
            ("2".to_string(), doc("b@x", 25)),
        ];
        manager.rebuild_all(&snapshot);

        let email = manager.find("IX_User_email").expect("email index");
        assert_eq!(email.state(), IndexState::Ready);
        assert!(email.lookup(&[IndexKey::string("old@x")]).is_empty());
        assert_eq!(email.stats().entries, 2);
    }

    #[test]
    fn rebuild_with_conflicting_data_fails_that_index_only() {
        let mut manager = manager_with_unique_email();
        let snapshot = vec![
            ("1".to_string(), doc("dup@x", 30)),
            ("2".to_string(), doc("dup@x", 25)),
        ];
        manager.rebuild_all(&snapshot);

        let email = manager.find("IX_User_email").expect("email index");
        assert_eq!(email.state(), IndexState::Failed);
        assert_eq!(email.stats().entries, 0);

        // The non-unique age index rebuilt fine.
        let age = manager.find("IX_User_age").expect("age index");
        assert_eq!(age.state(), IndexState::Ready);
        assert_eq!(age.stats().entries, 2);
    }

    #[test]
    fn identity_index_is_always_present() {
        let manager = IndexManager::new();
        assert_eq!(manager.len(), 1);
        assert!(manager.find(super::super::identity::IDENTITY_INDEX_NAME).is_some());
        assert!(!manager.is_empty());
    }
}
