//! Fluent assembly of a collection.
//!
//! [`CollectionBuilder`] gathers the backend, cache policy, conflict judge,
//! pipeline roots, index specs, id extraction strategy, and replication
//! tunables, then [`open`](CollectionBuilder::open)s the collection: the
//! cache pre-populates from `backend.load_all()` (corrupt entries are
//! skipped and counted, never aborting the open), indexes build from that
//! snapshot, and the TTL sweeper starts.

use std::sync::Arc;

use parking_lot::Mutex;

use acorn_core::clock::{ClockSource, MonotonicClock, SystemClock};
use acorn_core::judge::{ConflictJudge, TimestampJudge};
use acorn_core::{IdExtractor, Result};

use crate::backend::Backend;
use crate::cache::CachePolicy;
use crate::collection::{Collection, CollectionConfig, CollectionCore, CoreState, Document};
use crate::events::EventBus;
use crate::index::composite::{CompositeIndex, CompositeIndexSpec};
use crate::index::manager::IndexManager;
use crate::index::scalar::{ScalarIndex, ScalarIndexSpec};
use crate::pipeline::{Root, RootPipeline};
use crate::stats::CollectionStats;
use crate::sync::SeenChanges;
use crate::ttl::{SweepFn, TtlManager};

/// Step-by-step configuration for [`Collection::open`].
pub struct CollectionBuilder<T: Document> {
    backend: Box<dyn Backend>,
    config: CollectionConfig,
    cache_policy: CachePolicy,
    judge: Box<dyn ConflictJudge<T>>,
    extractor: IdExtractor<T>,
    clock: Box<dyn ClockSource>,
    roots: Vec<Arc<dyn Root>>,
    scalar_specs: Vec<ScalarIndexSpec>,
    composite_specs: Vec<CompositeIndexSpec>,
    sweeper_enabled: bool,
}

impl<T: Document> CollectionBuilder<T> {
    /// Starts a builder over `backend` with defaults: probing id
    /// extraction, timestamp judge, no eviction, no roots, identity index
    /// only.
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            config: CollectionConfig::default(),
            cache_policy: CachePolicy::default(),
            judge: Box::new(TimestampJudge),
            extractor: IdExtractor::default(),
            clock: Box::new(SystemClock),
            roots: Vec::new(),
            scalar_specs: Vec::new(),
            composite_specs: Vec::new(),
            sweeper_enabled: true,
        }
    }

    /// Sets the node identity used in replication.
    #[must_use]
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.config.node_id = node_id.into();
        self
    }

    /// Sets the cache eviction policy.
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the conflict judge.
    #[must_use]
    pub fn judge(mut self, judge: impl ConflictJudge<T> + 'static) -> Self {
        self.judge = Box::new(judge);
        self
    }

    /// Sets the id extraction strategy.
    #[must_use]
    pub fn extractor(mut self, extractor: IdExtractor<T>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Substitutes the clock source (deterministic tests).
    #[must_use]
    pub fn clock(mut self, clock: Box<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Installs a pipeline root; order is by the roots' sequences.
    #[must_use]
    pub fn root(mut self, root: impl Root + 'static) -> Self {
        self.roots.push(Arc::new(root));
        self
    }

    /// Registers a scalar index.
    #[must_use]
    pub fn scalar_index(mut self, spec: ScalarIndexSpec) -> Self {
        self.scalar_specs.push(spec);
        self
    }

    /// Registers a composite index.
    #[must_use]
    pub fn composite_index(mut self, spec: CompositeIndexSpec) -> Self {
        self.composite_specs.push(spec);
        self
    }

    /// Sets the maximum relay hop count.
    #[must_use]
    pub fn max_hop_count(mut self, hops: u32) -> Self {
        self.config.max_hop_count = hops;
        self
    }

    /// Sets the TTL sweep interval.
    #[must_use]
    pub fn sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Disables the background TTL sweeper (on-demand cleanup still works).
    #[must_use]
    pub fn without_sweeper(mut self) -> Self {
        self.sweeper_enabled = false;
        self
    }

    /// Disables automatic eviction on put (tests drive `evict_now`).
    #[must_use]
    pub fn without_auto_evict(mut self) -> Self {
        self.config.auto_evict = false;
        self
    }

    /// Opens the collection: pre-populates the cache, builds indexes, and
    /// starts the sweeper.
    ///
    /// # Errors
    ///
    /// Backend `load_all` failures. Individually corrupt records are
    /// skipped and counted instead.
    pub fn open(self) -> Result<Collection<T>> {
        let type_name = std::any::type_name::<T>();
        let mut indexes = IndexManager::new();
        for spec in &self.scalar_specs {
            indexes.register(Box::new(ScalarIndex::from_spec(spec, type_name)));
        }
        for spec in &self.composite_specs {
            indexes.register(Box::new(CompositeIndex::from_spec(spec, type_name)));
        }

        let auto_evict = self.config.auto_evict;
        let seen_capacity = self.config.seen_capacity;
        let core = Arc::new(CollectionCore {
            config: self.config,
            backend: self.backend,
            pipeline: RootPipeline::with_roots(self.roots),
            clock: MonotonicClock::new(self.clock),
            judge: self.judge,
            extractor: self.extractor,
            state: Mutex::new(CoreState {
                cache: std::collections::HashMap::new(),
                strategy: self.cache_policy.build(),
                indexes,
                seen: SeenChanges::new(seen_capacity),
                tangles: Vec::new(),
                bus: EventBus::new(),
            }),
            stats: CollectionStats::default(),
            disposed: std::sync::atomic::AtomicBool::new(false),
            auto_evict: std::sync::atomic::AtomicBool::new(auto_evict),
            last_sync_us: std::sync::atomic::AtomicI64::new(i64::MIN),
            ttl: Mutex::new(None),
        });

        // Pre-populate the cache from the backend, skipping corrupt rows.
        let mut snapshot: Vec<(String, serde_json::Value)> = Vec::new();
        {
            let entries: Vec<_> = core.backend.load_all()?.collect();
            let mut state = core.state.lock();
            for item in entries {
                let (id, entry) = match item {
                    Ok(pair) => pair,
                    Err(err) => {
                        core.stats.bump_corrupt_skipped();
                        tracing::warn!(error = %err, "skipping corrupt record at open");
                        continue;
                    }
                };
                match core.decode_entry(&id, entry) {
                    Ok(record) => {
                        if let Ok(json) = serde_json::to_value(&record.payload) {
                            snapshot.push((id.clone(), json));
                        }
                        state.strategy.on_stash(&id, record.meta.timestamp);
                        state.cache.insert(id, record);
                    }
                    Err(err) => {
                        core.stats.bump_corrupt_skipped();
                        tracing::warn!(key = %id, error = %err, "skipping corrupt record at open");
                    }
                }
            }
            state.indexes.rebuild_all(&snapshot);
        }

        if self.sweeper_enabled {
            let weak = Arc::downgrade(&core);
            let sweep: SweepFn = Arc::new(move || {
                weak.upgrade().map_or(Ok(0), |core| core.cleanup_expired())
            });
            let manager = TtlManager::start_with_interval(sweep, core.config.sweep_interval);
            *core.ttl.lock() = Some(manager);
        }

        Ok(Collection { core })
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::backend::memory::MemoryBackend;
    use crate::cache::CachePolicy;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Acorn {
        id: String,
        weight: u32,
    }

    fn acorn(id: &str, weight: u32) -> Acorn {
        Acorn {
            id: id.to_string(),
            weight,
        }
    }

    #[test]
    fn defaults_open_an_empty_collection() {
        let collection: Collection<Acorn> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .open()
                .expect("open");
        assert_eq!(collection.count(), 0);
        assert!(collection.node_id().starts_with("node-"));
        assert_eq!(collection.index_names().len(), 1);
    }

    #[test]
    fn configuration_is_honoured() {
        let collection: Collection<Acorn> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("oak-7")
                .cache_policy(CachePolicy::Lru { max_size: 16 })
                .scalar_index(ScalarIndexSpec::on("weight"))
                .max_hop_count(3)
                .without_sweeper()
                .open()
                .expect("open");

        assert_eq!(collection.node_id(), "oak-7");
        assert!(collection
            .index_names()
            .iter()
            .any(|n| n.contains("weight")));
    }

    #[test]
    fn open_preloads_existing_records() {
        let backend = MemoryBackend::new();
        {
            let seeded: Collection<Acorn> =
                CollectionBuilder::new(Box::new(MemoryBackend::new()))
                    .without_sweeper()
                    .open()
                    .expect("open");
            seeded.put(acorn("a1", 10)).expect("put");
            // Copy what the seeded collection persisted into our backend.
            for (id, entry) in seeded.core.backend.export_changes().expect("export") {
                backend.save(&id, &entry.body, &entry.meta).expect("save");
            }
        }

        let reopened: Collection<Acorn> = CollectionBuilder::new(Box::new(backend))
            .without_sweeper()
            .open()
            .expect("reopen");
        assert_eq!(reopened.count(), 1);
        assert_eq!(reopened.get("a1").expect("get").expect("present").weight, 10);
    }

    #[test]
    fn corrupt_records_are_skipped_with_a_counter() {
        let backend = MemoryBackend::new();
        backend
            .save(
                "bad",
                b"not json at all",
                &crate::backend::test_support::meta_at(1_000),
            )
            .expect("seed corrupt");
        backend
            .save(
                "good",
                br#"{"id":"good","weight":1}"#,
                &crate::backend::test_support::meta_at(2_000),
            )
            .expect("seed good");

        let collection: Collection<Acorn> = CollectionBuilder::new(Box::new(backend))
            .without_sweeper()
            .open()
            .expect("open despite corruption");

        assert_eq!(collection.count(), 1);
        assert_eq!(collection.stats().corrupt_skipped, 1);
    }
}
