//! The collection: a typed document set over one backend.
//!
//! A [`Collection`] composes every subsystem in this crate: the in-memory
//! working set with its cache strategy, the root pipeline on the way to and
//! from the backend, the index manager and query planner, TTL sweeping, the
//! event bus, and the replication fabric.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` (the "cache lock") guards the cache map, the
//! index set, the seen-change-id set, the tangle list, and the subscriber
//! list. It is **never** held across backend I/O, pipeline execution,
//! subscriber callbacks, or peer pushes: those snapshot what they need
//! under the lock and run outside it. Writers serialize on the lock;
//! readers hold it only for the in-memory probe.
//!
//! # Write path
//!
//! `put` runs: id validation -> payload serialization -> pipeline write
//! pass (policy denial aborts here, before any state changes) -> under the
//! lock: unique-index checks (atomic rejection), record assembly, cache and
//! index updates, seen-set insert, eviction settling -> backend save ->
//! subscriber notification -> peer push. A `UniqueIndexViolation` therefore
//! leaves cache, backend, indexes, subscribers, and peers untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use acorn_core::clock::MonotonicClock;
use acorn_core::judge::{ConflictDirection, ConflictJudge, Winner};
use acorn_core::record::{Record, RecordMeta};
use acorn_core::{AcornError, IdExtractor, Result};

use crate::backend::{Backend, Capabilities};
use crate::cache::CacheStrategy;
use crate::events::{EventBus, EventDispatch};
use crate::index::manager::IndexManager;
use crate::pipeline::{PipelineOp, RootContext, RootMetricsSnapshot, RootPipeline};
use crate::query::plan::QueryPlan;
use crate::query::planner::{self, QueryShape};
use crate::query::{OrderBy, Predicate};
use crate::stats::{CollectionStats, StatsSnapshot};
use crate::sync::peer::{Delivery, DeliveryTarget, InProcessPeer, Peer};
use crate::sync::tangle::{SyncMode, Tangle};
use crate::sync::SeenChanges;
use crate::ttl::TtlManager;

/// Bound alias for payload types a collection can hold.
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static> Document for T {}

/// Tunables fixed at open time.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// This node's identity in the replication fabric.
    pub node_id: String,
    /// Records relayed more than this many times are dropped.
    pub max_hop_count: u32,
    /// Bound on the seen-change-id set.
    pub seen_capacity: usize,
    /// TTL sweep interval.
    pub sweep_interval: Duration,
    /// Whether puts settle evictions automatically.
    pub auto_evict: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            node_id: format!("node-{}", &suffix[..8]),
            max_hop_count: crate::sync::DEFAULT_MAX_HOP_COUNT,
            seen_capacity: crate::sync::DEFAULT_SEEN_CAPACITY,
            sweep_interval: crate::ttl::DEFAULT_SWEEP_INTERVAL,
            auto_evict: true,
        }
    }
}

/// Everything the cache lock guards.
pub(crate) struct CoreState<T> {
    pub(crate) cache: HashMap<String, Record<T>>,
    pub(crate) strategy: Box<dyn CacheStrategy>,
    pub(crate) indexes: IndexManager,
    pub(crate) seen: SeenChanges,
    pub(crate) tangles: Vec<Arc<Tangle<T>>>,
    pub(crate) bus: EventBus<T>,
}

/// Shared engine behind [`Collection`] handles.
pub(crate) struct CollectionCore<T> {
    pub(crate) config: CollectionConfig,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) pipeline: RootPipeline,
    pub(crate) clock: MonotonicClock,
    pub(crate) judge: Box<dyn ConflictJudge<T>>,
    pub(crate) extractor: IdExtractor<T>,
    pub(crate) state: Mutex<CoreState<T>>,
    pub(crate) stats: CollectionStats,
    pub(crate) disposed: AtomicBool,
    pub(crate) auto_evict: AtomicBool,
    // Micros since epoch of the last export_delta; i64::MIN = never.
    pub(crate) last_sync_us: AtomicI64,
    pub(crate) ttl: Mutex<Option<TtlManager>>,
}

/// A typed document set with cache, pipeline, indexes, TTL, events, and
/// replication. Cheap to clone; clones share the same engine.
pub struct Collection<T: Document> {
    pub(crate) core: Arc<CollectionCore<T>>,
}

impl<T: Document> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Document> Collection<T> {
    /// Opens a collection over `backend` with defaults everywhere. For
    /// anything beyond that, use [`CollectionBuilder`](crate::builder::CollectionBuilder).
    ///
    /// # Errors
    ///
    /// Backend load failures at open.
    pub fn open(backend: Box<dyn Backend>) -> Result<Self> {
        crate::builder::CollectionBuilder::new(backend).open()
    }

    /// This node's identity.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.core.config.node_id
    }

    /// The backend's capability flags.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.core.backend.capabilities()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Metrics snapshot for the named pipeline root.
    #[must_use]
    pub fn root_metrics(&self, name: &str) -> Option<RootMetricsSnapshot> {
        self.core.pipeline.metrics(name)
    }

    /// Number of records resident in the cache.
    #[must_use]
    pub fn count(&self) -> usize {
        self.core.state.lock().cache.len()
    }

    /// Ids currently resident in the cache, sorted.
    #[must_use]
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.core.state.lock().cache.keys().cloned().collect();
        ids.sort();
        ids
    }

    // --- Write path ---

    /// Stores `doc` under its extracted id; returns the id.
    ///
    /// # Errors
    ///
    /// `IdExtractionUnavailable`, `InvalidId`, `UniqueIndexViolation`,
    /// `PolicyDenied`, `Disposed`, or backend failures.
    pub fn put(&self, doc: T) -> Result<String> {
        let id = self.core.extractor.extract(&doc)?;
        self.core.put_at(id.clone(), doc, None)?;
        Ok(id)
    }

    /// Stores `doc` under an explicit id.
    ///
    /// # Errors
    ///
    /// As [`put`](Self::put), minus id extraction.
    pub fn put_with_id(&self, id: impl Into<String>, doc: T) -> Result<()> {
        self.core
            .put_at(acorn_core::identity::validate(id.into())?, doc, None)
    }

    /// Stores `doc` with an expiry instant; `None` clears any expiry.
    ///
    /// # Errors
    ///
    /// As [`put_with_id`](Self::put_with_id).
    pub fn put_with_expiry(
        &self,
        id: impl Into<String>,
        doc: T,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.core
            .put_at(acorn_core::identity::validate(id.into())?, doc, Some(expires_at))
    }

    /// Fetches the payload for `id`; access time is refreshed on a hit.
    ///
    /// # Errors
    ///
    /// Backend read or pipeline decode failures.
    pub fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.core.get_record(id)?.map(|r| r.payload))
    }

    /// Fetches the full record for `id`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub fn get_record(&self, id: &str) -> Result<Option<Record<T>>> {
        self.core.get_record(id)
    }

    /// Deletes `id`, notifying subscribers and peers. Returns whether a
    /// record existed.
    ///
    /// # Errors
    ///
    /// `Disposed` or backend failures.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.core.delete_at(id, true)
    }

    /// Deletes `id` without peer propagation.
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub fn delete_local(&self, id: &str) -> Result<bool> {
        self.core.delete_at(id, false)
    }

    /// Prior versions of `id`, oldest first.
    ///
    /// # Errors
    ///
    /// `Unsupported` when the backend keeps no versions; decode failures.
    pub fn history(&self, id: &str) -> Result<Vec<Record<T>>> {
        let entries = self.core.backend.history(id)?;
        let mut versions = Vec::with_capacity(entries.len());
        for entry in entries {
            versions.push(self.core.decode_entry(id, entry)?);
        }
        Ok(versions)
    }

    // --- Conflict resolution ---

    /// Resolves `incoming` against the local record for `id` and stores the
    /// winner. `override_direction` bypasses the collection's judge.
    ///
    /// # Errors
    ///
    /// Backend failures while storing an incoming winner.
    pub fn squabble(
        &self,
        id: &str,
        incoming: Record<T>,
        override_direction: Option<ConflictDirection>,
    ) -> Result<Winner> {
        self.core.squabble(
            id,
            incoming,
            override_direction.unwrap_or(ConflictDirection::UseJudge),
            None,
        )
    }

    // --- Export / sync ---

    /// Every live record, for full sync.
    #[must_use]
    pub fn export_changes(&self) -> Vec<Record<T>> {
        self.core.export_since(DateTime::<Utc>::MIN_UTC)
    }

    /// Records with `timestamp > t`.
    #[must_use]
    pub fn export_since(&self, t: DateTime<Utc>) -> Vec<Record<T>> {
        self.core.export_since(t)
    }

    /// Records changed since the previous `export_delta` call, advancing
    /// the delta cursor. Receivers dedup by change id, so a record that
    /// lands on the cursor boundary at worst re-exports harmlessly.
    #[must_use]
    pub fn export_delta(&self) -> Vec<Record<T>> {
        let now = self.core.clock.raw_now();
        let previous_us = self
            .core
            .last_sync_us
            .swap(now.timestamp_micros(), Ordering::SeqCst);
        let since = DateTime::<Utc>::from_timestamp_micros(previous_us)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.core.export_since(since)
    }

    /// Registers a tangle; entangling the same remote twice returns the
    /// existing tangle instead of adding a duplicate.
    pub fn entangle(&self, tangle: Tangle<T>) -> Arc<Tangle<T>> {
        let mut state = self.core.state.lock();
        let remote = tangle.remote_node_id();
        if let Some(existing) = state
            .tangles
            .iter()
            .find(|t| !t.is_disposed() && t.remote_node_id() == remote)
        {
            return Arc::clone(existing);
        }
        let tangle = Arc::new(tangle);
        state.tangles.push(Arc::clone(&tangle));
        tangle
    }

    /// Entangles a peer endpoint with the given mode.
    pub fn entangle_peer(&self, peer: Arc<dyn Peer<T>>, mode: SyncMode) -> Arc<Tangle<T>> {
        self.entangle(Tangle::new(peer, mode))
    }

    /// Creates a bidirectional in-process entanglement with `other`
    /// (both directions). Returns whether anything new was created.
    pub fn entangle_with(&self, other: &Collection<T>) -> bool {
        let already = {
            let state = self.core.state.lock();
            state
                .tangles
                .iter()
                .any(|t| !t.is_disposed() && t.remote_node_id() == other.node_id())
        };
        if already {
            return false;
        }

        self.entangle_peer(
            Arc::new(in_process_peer_to(other)),
            SyncMode::Bidirectional,
        );
        other.entangle_peer(
            Arc::new(in_process_peer_to(self)),
            SyncMode::Bidirectional,
        );
        true
    }

    /// Removes and disposes the tangle to `remote_node_id`.
    pub fn detangle(&self, remote_node_id: &str) -> bool {
        let mut state = self.core.state.lock();
        let before = state.tangles.len();
        state.tangles.retain(|t| {
            if t.remote_node_id() == remote_node_id {
                t.dispose();
                false
            } else {
                true
            }
        });
        state.tangles.len() != before
    }

    /// Removes and disposes every tangle.
    pub fn detangle_all(&self) {
        let mut state = self.core.state.lock();
        for tangle in &state.tangles {
            tangle.dispose();
        }
        state.tangles.clear();
    }

    /// Current tangles, in registration order.
    #[must_use]
    pub fn tangles(&self) -> Vec<Arc<Tangle<T>>> {
        self.core.state.lock().tangles.clone()
    }

    /// Pulls every pull-capable peer's records and merges them through the
    /// judge (honouring per-tangle overrides). Returns how many incoming
    /// records won.
    ///
    /// # Errors
    ///
    /// Backend failures while storing winners; fetch failures are
    /// best-effort and merge nothing.
    pub fn shake(&self) -> Result<usize> {
        let now = self.core.clock.raw_now();
        let tangles = self.tangles();
        let mut merged = 0_usize;
        for tangle in tangles {
            if tangle.is_disposed() || !tangle.mode().pulls() {
                continue;
            }
            let from_node = tangle.remote_node_id();
            for record in tangle.pull(now)? {
                let accepted = self.core.merge_pulled(
                    record,
                    tangle.conflict_override(),
                    &from_node,
                )?;
                if accepted {
                    merged += 1;
                }
            }
        }
        Ok(merged)
    }

    /// Pushes local state to every push-capable tangle: records changed
    /// since the tangle's last sync when its delta-sync flag is set, the
    /// full export otherwise. Receivers dedup by change id, so overlapping
    /// syncs converge rather than duplicate. Returns records pushed.
    pub fn sync_now(&self) -> usize {
        let now = self.core.clock.raw_now();
        let tangles = self.tangles();
        let mut pushed = 0_usize;
        for tangle in tangles {
            if tangle.is_disposed() || !tangle.mode().pushes() {
                continue;
            }
            let records = if tangle.delta_sync_enabled() {
                let since = tangle
                    .stats()
                    .last_sync
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                self.core.export_since(since)
            } else {
                self.core.export_since(DateTime::<Utc>::MIN_UTC)
            };
            for record in records {
                pushed += 1;
                // Failures are counted by the tangle; disposal raced us.
                let _ = tangle.push(&Delivery::Upsert(record), self.node_id(), now);
            }
        }
        pushed
    }

    // --- Cache / TTL maintenance ---

    /// Runs eviction immediately; returns how many records left the cache.
    #[must_use]
    pub fn evict_now(&self) -> usize {
        self.core.evict_now()
    }

    /// Enables or disables automatic eviction on put.
    pub fn set_auto_evict(&self, enabled: bool) {
        self.core.auto_evict.store(enabled, Ordering::Relaxed);
    }

    /// Swaps the cache strategy. Access history does not migrate.
    pub fn set_cache_strategy(&self, strategy: Box<dyn CacheStrategy>) {
        self.core.state.lock().strategy = strategy;
    }

    /// Removes every expired record now; returns how many.
    ///
    /// # Errors
    ///
    /// Backend delete failures.
    pub fn cleanup_expired_now(&self) -> Result<usize> {
        self.core.cleanup_expired()
    }

    /// Ids whose `expires_at` falls within the next `window`.
    #[must_use]
    pub fn expiring_within(&self, window: Duration) -> Vec<String> {
        let now = self.core.clock.raw_now();
        let horizon = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let state = self.core.state.lock();
        let mut ids: Vec<String> = state
            .cache
            .values()
            .filter(|r| {
                r.meta
                    .expires_at
                    .is_some_and(|at| at > now && at <= horizon)
            })
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Changes the TTL sweep interval, restarting the sweeper.
    pub fn set_sweep_interval(&self, interval: Duration) {
        if let Some(ttl) = self.core.ttl.lock().as_ref() {
            ttl.set_interval(interval);
        }
    }

    /// Enables or disables the periodic TTL sweep.
    pub fn set_ttl_enabled(&self, enabled: bool) {
        if let Some(ttl) = self.core.ttl.lock().as_ref() {
            ttl.set_enabled(enabled);
        }
    }

    // --- Events ---

    /// Subscribes to change notifications (puts and deletes of existing
    /// records). Delivery order is registration order.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        self.core.state.lock().bus.subscribe(callback);
    }

    // --- Query ---

    /// Starts a fluent query.
    #[must_use]
    pub fn query(&self) -> CollectionQuery<T> {
        CollectionQuery {
            core: Arc::clone(&self.core),
            predicate: None,
            order: None,
            skip: None,
            take: None,
            hint: None,
        }
    }

    /// Rebuilds every index from the current cache snapshot.
    pub fn rebuild_indexes(&self) {
        let mut state = self.core.state.lock();
        let snapshot: Vec<(String, serde_json::Value)> = state
            .cache
            .values()
            .filter_map(|r| {
                serde_json::to_value(&r.payload)
                    .ok()
                    .map(|json| (r.id.clone(), json))
            })
            .collect();
        state.indexes.rebuild_all(&snapshot);
    }

    /// Names of every index, identity first.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.core
            .state
            .lock()
            .indexes
            .all()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    // --- Lifecycle ---

    /// Whether this collection has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Relaxed)
    }

    /// Disposes the collection: cancels the sweeper, disposes every
    /// tangle, and fails subsequent mutations with `Disposed`. Reads keep
    /// working as long as the backend can serve them.
    pub fn dispose(&self) {
        self.core.disposed.store(true, Ordering::Relaxed);
        if let Some(ttl) = self.core.ttl.lock().take() {
            ttl.shutdown();
        }
        self.detangle_all();
    }
}

/// Builds an in-process peer pointing at `target`.
fn in_process_peer_to<T: Document>(target: &Collection<T>) -> InProcessPeer<T> {
    let weak: Weak<dyn DeliveryTarget<T>> = {
        let arc: Arc<dyn DeliveryTarget<T>> = Arc::clone(&target.core) as _;
        Arc::downgrade(&arc)
    };
    InProcessPeer::new(target.node_id().to_string(), weak)
}

impl<T: Document> CollectionCore<T> {
    fn ensure_writable(&self) -> Result<()> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(AcornError::Disposed("collection"));
        }
        Ok(())
    }

    /// Serializes and pipelines the payload; returns (json, body bytes).
    fn encode_payload(&self, id: &str, payload: &T) -> Result<(serde_json::Value, Vec<u8>)> {
        let json = serde_json::to_value(payload)?;
        let bytes = serde_json::to_vec(&json)?;
        let mut ctx = RootContext::new(PipelineOp::Write, Some(id.to_string()));
        let body = self.pipeline.on_write(bytes, &mut ctx)?;
        Ok((json, body))
    }

    /// Reverses the pipeline on a stored entry and rebuilds the record.
    pub(crate) fn decode_entry(
        &self,
        id: &str,
        entry: crate::backend::StoredEntry,
    ) -> Result<Record<T>> {
        let mut ctx = RootContext::new(PipelineOp::Read, Some(id.to_string()));
        let bytes = self.pipeline.on_read(entry.body, &mut ctx)?;
        let payload: T = serde_json::from_slice(&bytes)?;
        Ok(Record {
            id: id.to_string(),
            payload,
            meta: entry.meta,
            extras: std::collections::BTreeMap::new(),
        })
    }

    /// The put entry point. `expires_at`: `None` preserves the previous
    /// expiry on replace, `Some(x)` sets it explicitly.
    fn put_at(
        &self,
        id: String,
        payload: T,
        expires_at: Option<Option<DateTime<Utc>>>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let (json, body) = self.encode_payload(&id, &payload)?;
        let timestamp = self.clock.tick();

        // Under the lock: atomic unique check, then all in-memory effects.
        let (record, dispatch, tangles) = {
            let mut state = self.state.lock();
            state.indexes.check_violations(&id, &json)?;

            let mut meta = match state.cache.get(&id) {
                Some(previous) => {
                    RecordMeta::replacing(&previous.meta, timestamp, &self.config.node_id)
                }
                None => RecordMeta::first(timestamp, &self.config.node_id),
            };
            if let Some(expiry) = expires_at {
                meta.expires_at = expiry;
            }
            let record = Record {
                id: id.clone(),
                payload,
                meta,
                extras: std::collections::BTreeMap::new(),
            };

            self.install(&mut state, &record, &json);
            state.seen.insert(record.meta.change_id);
            self.settle_evictions(&mut state);

            (record.clone(), state.bus.snapshot(), state.tangles.clone())
        };

        self.backend.save(&id, &body, &record.meta)?;
        self.stats.bump_puts();

        self.notify(&dispatch, &record.payload);
        self.propagate(&tangles, &Delivery::Upsert(record), None);
        Ok(())
    }

    /// Inserts into cache and indexes; caller holds the lock.
    fn install(&self, state: &mut CoreState<T>, record: &Record<T>, json: &serde_json::Value) {
        let now = record.meta.timestamp;
        state.strategy.on_stash(&record.id, now);
        state.cache.insert(record.id.clone(), record.clone());
        state.indexes.remove(&record.id);
        if let Err(err) = state.indexes.apply(&record.id, json) {
            // check_violations ran first, so this is a broken invariant,
            // not a user error.
            tracing::error!(key = %record.id, error = %err, "index apply failed after checks");
        }
    }

    /// Evicts down to the strategy's bound; caller holds the lock.
    fn settle_evictions(&self, state: &mut CoreState<T>) -> usize {
        if !self.auto_evict.load(Ordering::Relaxed) {
            return 0;
        }
        self.evict_in(state)
    }

    fn evict_in(&self, state: &mut CoreState<T>) -> usize {
        let resident: Vec<String> = state.cache.keys().cloned().collect();
        let candidates = state.strategy.eviction_candidates(&resident);
        let mut evicted = 0_usize;
        for id in candidates {
            if state.cache.remove(&id).is_some() {
                state.strategy.on_toss(&id);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.add_evictions(evicted as u64);
            tracing::debug!(evicted, "cache eviction settled");
        }
        evicted
    }

    pub(crate) fn evict_now(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_in(&mut state)
    }

    pub(crate) fn get_record(&self, id: &str) -> Result<Option<Record<T>>> {
        self.stats.bump_gets();
        // Expiry compares against the wall clock; access bookkeeping uses
        // monotonic ticks so a stalled clock cannot age a fresh read.
        let now = self.clock.raw_now();

        // Cache probe under the lock.
        {
            let mut state = self.state.lock();
            if let Some(record) = state.cache.get(id) {
                if record.meta.is_expired(now) {
                    return Ok(None);
                }
                let record = record.clone();
                state.strategy.on_crack(id, self.clock.tick());
                self.stats.bump_cache_hits();
                return Ok(Some(record));
            }
        }
        self.stats.bump_cache_misses();

        // Miss: load and decode outside the lock.
        let Some(entry) = self.backend.load(id)? else {
            return Ok(None);
        };
        if entry.meta.is_expired(now) {
            return Ok(None);
        }
        let record = self.decode_entry(id, entry)?;

        // Repopulate, then settle in case the reload overflowed the bound.
        {
            let mut state = self.state.lock();
            state.strategy.on_stash(id, self.clock.tick());
            state.cache.insert(id.to_string(), record.clone());
            self.settle_evictions(&mut state);
        }
        Ok(Some(record))
    }

    fn delete_at(&self, id: &str, propagate: bool) -> Result<bool> {
        self.ensure_writable()?;

        let Some((removed, change_id, dispatch, tangles)) = ({
            let mut state = self.state.lock();
            match state.cache.remove(id) {
                None => None,
                Some(removed) => {
                    state.strategy.on_toss(id);
                    state.indexes.remove(id);
                    let change_id = Uuid::new_v4();
                    state.seen.insert(change_id);
                    Some((removed, change_id, state.bus.snapshot(), state.tangles.clone()))
                }
            }
        }) else {
            return Ok(false);
        };

        self.backend.delete(id)?;
        self.stats.bump_deletes();
        self.notify(&dispatch, &removed.payload);

        if propagate {
            self.propagate(
                &tangles,
                &Delivery::Delete {
                    id: id.to_string(),
                    change_id,
                    origin_node_id: self.config.node_id.clone(),
                    hop_count: 0,
                },
                None,
            );
        }
        Ok(true)
    }

    pub(crate) fn cleanup_expired(&self) -> Result<usize> {
        let now = self.clock.raw_now();
        let expired: Vec<String> = {
            let state = self.state.lock();
            state
                .cache
                .values()
                .filter(|r| r.meta.is_expired(now))
                .map(|r| r.id.clone())
                .collect()
        };

        let mut removed = 0_usize;
        for id in expired {
            // Expiry travels with the record, so peers expire on their own;
            // no propagation.
            if self.delete_at(&id, false)? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.add_expirations(removed as u64);
        }
        Ok(removed)
    }

    pub(crate) fn export_since(&self, t: DateTime<Utc>) -> Vec<Record<T>> {
        let now = self.clock.raw_now();
        let state = self.state.lock();
        state
            .cache
            .values()
            .filter(|r| r.meta.timestamp > t && !r.meta.is_expired(now))
            .cloned()
            .collect()
    }

    /// Stores `record` exactly as given (meta preserved) and notifies
    /// subscribers. Used by conflict resolution and remote applies.
    fn store_record(&self, record: &Record<T>) -> Result<()> {
        let (json, body) = self.encode_payload(&record.id, &record.payload)?;

        let dispatch = {
            let mut state = self.state.lock();
            state.indexes.check_violations(&record.id, &json)?;
            self.install(&mut state, record, &json);
            self.settle_evictions(&mut state);
            state.bus.snapshot()
        };

        self.backend.save(&record.id, &body, &record.meta)?;
        self.notify(&dispatch, &record.payload);
        Ok(())
    }

    /// Conflict-resolves `incoming` against the local record.
    ///
    /// `exclude_node`: peer to skip when propagating (the deliverer).
    fn squabble(
        &self,
        id: &str,
        incoming: Record<T>,
        direction: ConflictDirection,
        exclude_node: Option<&str>,
    ) -> Result<Winner> {
        self.ensure_writable()?;
        let local = self.state.lock().cache.get(id).cloned();

        let winner = match &local {
            None => Winner::Incoming,
            Some(local_record) => match direction {
                ConflictDirection::PreferLocal => Winner::Local,
                ConflictDirection::PreferRemote => Winner::Incoming,
                ConflictDirection::UseJudge => self.judge.judge(local_record, &incoming),
            },
        };
        if local.is_some() {
            self.stats.bump_conflicts_resolved();
            tracing::debug!(
                key = %id,
                judge = %self.judge.name(),
                winner = ?winner,
                "conflict resolved"
            );
        }

        if winner == Winner::Incoming {
            self.state.lock().seen.insert(incoming.meta.change_id);
            self.store_record(&incoming)?;
            let tangles = self.state.lock().tangles.clone();
            self.propagate(&tangles, &Delivery::Upsert(incoming), exclude_node);
        }
        Ok(winner)
    }

    /// Applies a record pulled during `shake()`, loop-gated like any other
    /// delivery.
    fn merge_pulled(
        &self,
        record: Record<T>,
        direction: ConflictDirection,
        from_node: &str,
    ) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if record.meta.origin_node_id == self.config.node_id
                || !state.seen.insert(record.meta.change_id)
            {
                self.stats.bump_deliveries_deduped();
                return Ok(false);
            }
            self.stats.bump_tracked_change_ids();
        }
        let id = record.id.clone();
        let winner = self.squabble(&id, record, direction, Some(from_node))?;
        Ok(winner == Winner::Incoming)
    }

    /// Pushes a delivery to every live, push-capable tangle except
    /// `exclude_node`. Runs outside the cache lock.
    fn propagate(
        &self,
        tangles: &[Arc<Tangle<T>>],
        delivery: &Delivery<T>,
        exclude_node: Option<&str>,
    ) {
        if tangles.is_empty() {
            return;
        }
        let now = self.clock.raw_now();
        for tangle in tangles {
            if tangle.is_disposed() {
                continue;
            }
            if exclude_node.is_some_and(|node| tangle.remote_node_id() == node) {
                continue;
            }
            // Push failures are counted inside the tangle; a disposed
            // tangle raced us and is skipped.
            let _ = tangle.push(delivery, &self.config.node_id, now);
        }
    }

    fn notify(&self, dispatch: &EventDispatch<T>, doc: &T) {
        if dispatch.is_empty() {
            return;
        }
        dispatch.notify(doc);
        self.stats.bump_subscriber_notifications();
    }
}

impl<T: Document> DeliveryTarget<T> for CollectionCore<T> {
    fn node_id(&self) -> String {
        self.config.node_id.clone()
    }

    fn apply_delivery(&self, delivery: Delivery<T>, from_node: &str) -> Result<bool> {
        self.ensure_writable()?;

        // Loop prevention: unseen change id, foreign origin, hops in bounds.
        {
            let mut state = self.state.lock();
            if state.seen.contains(delivery.change_id()) {
                self.stats.bump_deliveries_deduped();
                return Ok(false);
            }
            if delivery.origin_node_id() == self.config.node_id {
                self.stats.bump_deliveries_deduped();
                return Ok(false);
            }
            if delivery.hop_count() >= self.config.max_hop_count {
                tracing::warn!(
                    change_id = %delivery.change_id(),
                    hops = delivery.hop_count(),
                    "delivery exceeded hop limit; dropping"
                );
                return Ok(false);
            }
            state.seen.insert(delivery.change_id());
            self.stats.bump_tracked_change_ids();
        }

        match delivery {
            Delivery::Upsert(record) => {
                let id = record.id.clone();
                let relay = Delivery::Upsert(record.clone()).relayed();

                // Which of our tangles points back at the deliverer decides
                // the conflict override.
                let direction = {
                    let state = self.state.lock();
                    state
                        .tangles
                        .iter()
                        .find(|t| t.remote_node_id() == from_node)
                        .map_or(ConflictDirection::UseJudge, |t| t.conflict_override())
                };

                let local = self.state.lock().cache.get(&id).cloned();
                let winner = match &local {
                    None => Winner::Incoming,
                    Some(local_record) => match direction {
                        ConflictDirection::PreferLocal => Winner::Local,
                        ConflictDirection::PreferRemote => Winner::Incoming,
                        ConflictDirection::UseJudge => self.judge.judge(local_record, &record),
                    },
                };
                if local.is_some() {
                    self.stats.bump_conflicts_resolved();
                }

                if winner == Winner::Incoming {
                    if let Err(err) = self.store_record(&record) {
                        tracing::warn!(
                            key = %id,
                            error = %err,
                            "rejected delivered record; not re-propagating"
                        );
                        return Ok(false);
                    }
                }
                self.stats.bump_deliveries_applied();

                // Accepted deliveries relay onward, excluding the source,
                // regardless of the local verdict: downstream nodes judge
                // for themselves.
                let tangles = self.state.lock().tangles.clone();
                self.propagate(&tangles, &relay, Some(from_node));
                Ok(true)
            }
            Delivery::Delete { ref id, .. } => {
                let removed = {
                    let mut state = self.state.lock();
                    match state.cache.remove(id) {
                        None => None,
                        Some(removed) => {
                            state.strategy.on_toss(id);
                            state.indexes.remove(id);
                            Some((removed, state.bus.snapshot()))
                        }
                    }
                };
                if let Some((removed, dispatch)) = removed {
                    self.backend.delete(id)?;
                    self.stats.bump_deletes();
                    self.notify(&dispatch, &removed.payload);
                }
                self.stats.bump_deliveries_applied();

                let relay = delivery.relayed();
                let tangles = self.state.lock().tangles.clone();
                self.propagate(&tangles, &relay, Some(from_node));
                Ok(true)
            }
        }
    }

    fn export_records(&self) -> Result<Vec<Record<T>>> {
        Ok(self.export_since(DateTime::<Utc>::MIN_UTC))
    }
}

/// Fluent query over a collection.
pub struct CollectionQuery<T: Document> {
    core: Arc<CollectionCore<T>>,
    predicate: Option<Predicate>,
    order: Option<OrderBy>,
    skip: Option<usize>,
    take: Option<usize>,
    hint: Option<String>,
}

impl<T: Document> CollectionQuery<T> {
    /// Adds a WHERE predicate; multiple calls AND together.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Predicate::and([existing, predicate]),
            None => predicate,
        });
        self
    }

    /// Sets the ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Caps the result count at `n`.
    #[must_use]
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Forces the named index.
    #[must_use]
    pub fn with_hint(mut self, index_name: impl Into<String>) -> Self {
        self.hint = Some(index_name.into());
        self
    }

    /// Plans without executing.
    #[must_use]
    pub fn explain(&self) -> QueryPlan {
        let conditions = self
            .predicate
            .as_ref()
            .map(Predicate::conditions)
            .unwrap_or_default();
        let state = self.core.state.lock();
        planner::plan(
            &QueryShape {
                conditions: &conditions,
                order_by: self.order.as_ref(),
                hint: self.hint.as_deref(),
                total_records: state.cache.len(),
            },
            state.indexes.all(),
        )
    }

    /// Formats the plan without executing.
    #[must_use]
    pub fn explain_string(&self) -> String {
        self.explain().explain_string()
    }

    /// Executes and returns matching payloads.
    ///
    /// # Errors
    ///
    /// Backend failures while hydrating records.
    pub fn execute(self) -> Result<Vec<T>> {
        Ok(self
            .execute_records()?
            .into_iter()
            .map(|r| r.payload)
            .collect())
    }

    /// Executes and returns matching records.
    ///
    /// # Errors
    ///
    /// Backend failures while hydrating records.
    pub fn execute_records(self) -> Result<Vec<Record<T>>> {
        let conditions = self
            .predicate
            .as_ref()
            .map(Predicate::conditions)
            .unwrap_or_default();

        // Plan and fetch candidate ids under the lock, then hydrate outside.
        let ids = {
            let state = self.core.state.lock();
            let plan = planner::plan(
                &QueryShape {
                    conditions: &conditions,
                    order_by: self.order.as_ref(),
                    hint: self.hint.as_deref(),
                    total_records: state.cache.len(),
                },
                state.indexes.all(),
            );
            planner::fetch_ids(&plan.access, state.indexes.all()).unwrap_or_else(|| {
                // Full scan: sorted ids for deterministic results.
                let mut ids: Vec<String> = state.cache.keys().cloned().collect();
                ids.sort();
                ids
            })
        };

        // Hydrate through the collection: the index is a filter, not a
        // proof, so the compiled predicate re-checks every row.
        let compiled = self.predicate.as_ref().map(Predicate::compile);
        let mut rows: Vec<(String, serde_json::Value, Record<T>)> = Vec::new();
        for id in ids {
            let Some(record) = self.core.get_record(&id)? else {
                continue;
            };
            let json = serde_json::to_value(&record.payload)?;
            if compiled.as_ref().is_none_or(|p| p(&json)) {
                rows.push((id, json, record));
            }
        }

        if let Some(order) = &self.order {
            let mut keyed: Vec<(String, serde_json::Value)> = rows
                .iter()
                .map(|(id, json, _)| (id.clone(), json.clone()))
                .collect();
            crate::query::sort_results(&mut keyed, order);
            let position: HashMap<&str, usize> = keyed
                .iter()
                .enumerate()
                .map(|(i, (id, _))| (id.as_str(), i))
                .collect();
            rows.sort_by_key(|(id, _, _)| position.get(id.as_str()).copied().unwrap_or(usize::MAX));
        }

        let skip = self.skip.unwrap_or(0);
        let take = self.take.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, _, record)| record)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use acorn_core::clock::test_support::FixedClock;
    use acorn_core::judge::PreferRemoteJudge;

    use crate::backend::memory::MemoryBackend;
    use crate::builder::CollectionBuilder;
    use crate::cache::CachePolicy;
    use crate::index::scalar::ScalarIndexSpec;
    use crate::query::{OrderBy, Predicate};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Squirrel {
        id: String,
        name: String,
        nuts: u32,
    }

    fn squirrel(id: &str, name: &str, nuts: u32) -> Squirrel {
        Squirrel {
            id: id.to_string(),
            name: name.to_string(),
            nuts,
        }
    }

    fn open(node: &str) -> Collection<Squirrel> {
        CollectionBuilder::new(Box::new(MemoryBackend::new()))
            .node_id(node)
            .without_sweeper()
            .open()
            .expect("open")
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(millis).expect("millis in range")
    }

    #[test]
    fn put_then_get_round_trips_the_payload() {
        let collection = open("n1");
        let id = collection.put(squirrel("s1", "Hazel", 3)).expect("put");
        assert_eq!(id, "s1");

        let fetched = collection.get("s1").expect("get").expect("present");
        assert_eq!(fetched, squirrel("s1", "Hazel", 3));
        assert_eq!(collection.get("missing").expect("get"), None);
    }

    #[test]
    fn replacing_a_record_bumps_its_version() {
        let collection = open("n1");
        collection.put(squirrel("s1", "Hazel", 3)).expect("put");
        collection.put(squirrel("s1", "Hazel", 4)).expect("replace");

        let record = collection.get_record("s1").expect("get").expect("present");
        assert_eq!(record.meta.version, 2);
        assert_eq!(record.payload.nuts, 4);
        assert_eq!(collection.count(), 1);
    }

    #[test]
    fn empty_ids_are_rejected() {
        let collection = open("n1");
        assert!(matches!(
            collection.put_with_id("   ", squirrel("x", "x", 0)),
            Err(AcornError::InvalidId(_))
        ));
    }

    #[test]
    fn unique_violation_is_an_atomic_rejection() {
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .scalar_index(ScalarIndexSpec::on("name").unique())
                .without_sweeper()
                .open()
                .expect("open");

        collection.put(squirrel("1", "Hazel", 1)).expect("first");
        let err = collection.put(squirrel("2", "Hazel", 2)).unwrap_err();
        assert!(matches!(err, AcornError::UniqueIndexViolation { .. }));

        // Nothing about id 2 exists anywhere.
        assert_eq!(collection.get("2").expect("get"), None);
        assert_eq!(collection.count(), 1);
        let hits = collection
            .query()
            .filter(Predicate::eq("name", "Hazel"))
            .execute()
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[test]
    fn delete_removes_and_reports_existence() {
        let collection = open("n1");
        collection.put(squirrel("s1", "Hazel", 3)).expect("put");

        assert!(collection.delete("s1").expect("delete"));
        assert_eq!(collection.get("s1").expect("get"), None);
        assert!(!collection.delete("s1").expect("re-delete"));
    }

    #[test]
    fn subscribers_hear_puts_and_deletes_of_existing_records() {
        let collection = open("n1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            collection.subscribe(move |doc: &Squirrel| seen.lock().push(doc.name.clone()));
        }

        collection.put(squirrel("s1", "Hazel", 1)).expect("put");
        collection.delete("s1").expect("delete");
        collection.delete("s1").expect("absent delete");

        assert_eq!(*seen.lock(), vec!["Hazel", "Hazel"]);
        assert_eq!(collection.stats().subscriber_notifications, 2);
    }

    #[test]
    fn expired_records_are_absent_at_the_boundary() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .without_sweeper()
                .open()
                .expect("open");

        collection
            .put_with_expiry("s1", squirrel("s1", "Hazel", 1), Some(at(1_000_500)))
            .expect("put");
        assert!(collection.get("s1").expect("get").is_some());

        // expires_at exactly equal to now: already absent.
        millis.store(1_000_500, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(collection.get("s1").expect("get"), None);

        let removed = collection.cleanup_expired_now().expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(collection.count(), 0);
        assert_eq!(collection.stats().expirations, 1);
    }

    #[test]
    fn expiring_within_windows_on_the_horizon() {
        let (clock, _) = FixedClock::new(1_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .without_sweeper()
                .open()
                .expect("open");

        collection
            .put_with_expiry("soon", squirrel("soon", "a", 1), Some(at(1_030_000)))
            .expect("put");
        collection
            .put_with_expiry("later", squirrel("later", "b", 1), Some(at(1_400_000)))
            .expect("put");
        collection
            .put_with_id("never", squirrel("never", "c", 1))
            .expect("put");

        let within = collection.expiring_within(Duration::from_secs(60));
        assert_eq!(within, vec!["soon".to_string()]);
    }

    #[test]
    fn eviction_removes_from_cache_but_not_the_backend() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .cache_policy(CachePolicy::Lru { max_size: 2 })
                .without_sweeper()
                .open()
                .expect("open");

        collection.put(squirrel("a", "a", 1)).expect("put");
        millis.store(1_001_000, std::sync::atomic::Ordering::Relaxed);
        collection.put(squirrel("b", "b", 1)).expect("put");
        millis.store(1_002_000, std::sync::atomic::Ordering::Relaxed);
        collection.put(squirrel("c", "c", 1)).expect("put");

        // Oldest entry left the cache; bound holds.
        assert_eq!(collection.count(), 2);
        assert_eq!(collection.stats().evictions, 1);
        assert_eq!(collection.cached_ids(), vec!["b", "c"]);

        // The evicted record reloads from the backend on demand.
        let reloaded = collection.get("a").expect("get").expect("reloaded");
        assert_eq!(reloaded.name, "a");
    }

    #[test]
    fn export_since_filters_by_timestamp() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .without_sweeper()
                .open()
                .expect("open");

        collection.put(squirrel("a", "a", 1)).expect("put");
        millis.store(1_000_100, std::sync::atomic::Ordering::Relaxed);
        collection.put(squirrel("b", "b", 1)).expect("put");

        let since = collection.export_since(at(1_000_050));
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, "b");
        assert_eq!(collection.export_changes().len(), 2);
    }

    #[test]
    fn export_delta_advances_its_cursor() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .without_sweeper()
                .open()
                .expect("open");

        collection.put(squirrel("a", "a", 1)).expect("put");
        collection.put(squirrel("b", "b", 1)).expect("put");

        millis.store(1_000_100, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(collection.export_delta().len(), 2);
        assert!(collection.export_delta().is_empty());

        millis.store(1_000_200, std::sync::atomic::Ordering::Relaxed);
        collection.put(squirrel("c", "c", 1)).expect("put");
        millis.store(1_000_300, std::sync::atomic::Ordering::Relaxed);
        let delta = collection.export_delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, "c");
    }

    #[test]
    fn squabble_follows_timestamps_and_overrides() {
        let (clock, _) = FixedClock::new(2_000_000);
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .clock(Box::new(clock))
                .without_sweeper()
                .open()
                .expect("open");
        collection.put(squirrel("s1", "local", 1)).expect("put");

        // Incoming is newer: it wins under the default judge.
        let newer = Record::new("s1", squirrel("s1", "remote", 2), at(2_001_000), "n2");
        let winner = collection
            .squabble("s1", newer.clone(), None)
            .expect("squabble");
        assert_eq!(winner, Winner::Incoming);
        assert_eq!(
            collection.get("s1").expect("get").expect("present").name,
            "remote"
        );

        // PreferLocal overrides the timestamps entirely.
        let even_newer = Record::new("s1", squirrel("s1", "pushy", 3), at(2_002_000), "n2");
        let winner = collection
            .squabble("s1", even_newer, Some(ConflictDirection::PreferLocal))
            .expect("squabble");
        assert_eq!(winner, Winner::Local);
        assert_eq!(
            collection.get("s1").expect("get").expect("present").name,
            "remote"
        );
        assert!(collection.stats().conflicts_resolved >= 2);
    }

    #[test]
    fn builder_judge_is_used_for_squabbles() {
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .judge(PreferRemoteJudge)
                .without_sweeper()
                .open()
                .expect("open");
        collection.put(squirrel("s1", "local", 1)).expect("put");

        // Incoming is OLDER, but the configured judge prefers remote.
        let older = Record::new("s1", squirrel("s1", "remote", 2), at(1_000), "n2");
        let winner = collection.squabble("s1", older, None).expect("squabble");
        assert_eq!(winner, Winner::Incoming);
    }

    #[test]
    fn history_surfaces_backend_support() {
        let collection = open("n1");
        collection.put(squirrel("s1", "a", 1)).expect("put");
        assert!(matches!(
            collection.history("s1"),
            Err(AcornError::Unsupported { .. })
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let log = crate::backend::log::AppendLogBackend::open_dir(dir.path()).expect("log");
        let logged: Collection<Squirrel> = CollectionBuilder::new(Box::new(log))
            .node_id("n2")
            .without_sweeper()
            .open()
            .expect("open");
        logged.put(squirrel("s1", "v1", 1)).expect("put");
        logged.put(squirrel("s1", "v2", 2)).expect("put");

        let history = logged.history("s1").expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload.name, "v1");
        assert_eq!(history[1].payload.name, "v2");
    }

    #[test]
    fn queries_filter_order_and_page() {
        let collection = open("n1");
        for (id, name, nuts) in [
            ("s1", "Hazel", 30),
            ("s2", "Pip", 10),
            ("s3", "Alder", 20),
            ("s4", "Moss", 40),
        ] {
            collection.put(squirrel(id, name, nuts)).expect("put");
        }

        let rich: Vec<Squirrel> = collection
            .query()
            .filter(Predicate::ge("nuts", 20))
            .order_by(OrderBy::desc("nuts"))
            .execute()
            .expect("query");
        let names: Vec<&str> = rich.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Moss", "Hazel", "Alder"]);

        let page: Vec<Squirrel> = collection
            .query()
            .order_by(OrderBy::asc("nuts"))
            .skip(1)
            .take(2)
            .execute()
            .expect("query");
        let names: Vec<&str> = page.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Alder", "Hazel"]);
    }

    #[test]
    fn query_plans_use_registered_indexes() {
        let collection: Collection<Squirrel> =
            CollectionBuilder::new(Box::new(MemoryBackend::new()))
                .node_id("n1")
                .scalar_index(ScalarIndexSpec::on("nuts"))
                .without_sweeper()
                .open()
                .expect("open");
        for i in 0..10_u32 {
            collection
                .put(squirrel(&format!("s{i}"), &format!("sq-{i}"), i))
                .expect("put");
        }

        let query = collection.query().filter(Predicate::eq("nuts", 5));
        let plan = query.explain();
        assert_eq!(plan.strategy, crate::query::plan::PlanStrategy::IndexSeek);
        assert!(plan.index.as_deref().unwrap_or("").contains("nuts"));

        let hits = query.execute().expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].nuts, 5);
    }

    #[test]
    fn disposed_collections_reject_mutations_but_serve_reads() {
        let collection = open("n1");
        collection.put(squirrel("s1", "a", 1)).expect("put");

        collection.dispose();
        assert!(collection.is_disposed());
        assert!(matches!(
            collection.put(squirrel("s2", "b", 2)),
            Err(AcornError::Disposed(_))
        ));
        assert!(matches!(
            collection.delete("s1"),
            Err(AcornError::Disposed(_))
        ));
        assert_eq!(collection.get("s1").expect("get").expect("present").name, "a");
    }

    #[test]
    fn detangle_disposes_and_removes() {
        let a = open("a");
        let b = open("b");
        assert!(a.entangle_with(&b));
        assert_eq!(a.tangles().len(), 1);

        let tangle = &a.tangles()[0];
        assert!(a.detangle("b"));
        assert!(tangle.is_disposed());
        assert!(a.tangles().is_empty());
        assert!(!a.detangle("b"));
    }

    #[test]
    fn entangled_puts_replicate_both_ways() {
        let a = open("a");
        let b = open("b");
        a.entangle_with(&b);

        a.put(squirrel("from-a", "a", 1)).expect("put");
        b.put(squirrel("from-b", "b", 2)).expect("put");

        assert!(a.get("from-b").expect("get").is_some());
        assert!(b.get("from-a").expect("get").is_some());
        assert_eq!(b.stats().deliveries_applied, 1);
        assert_eq!(b.stats().tracked_change_ids, 1);
    }

    #[test]
    fn delete_propagation_respects_the_flag() {
        let a = open("a");
        let b = open("b");
        a.entangle_with(&b);

        a.put(squirrel("k", "a", 1)).expect("put");
        assert!(b.get("k").expect("get").is_some());

        // Local-only delete leaves the peer alone.
        a.delete_local("k").expect("delete");
        assert!(a.get("k").expect("get").is_none());
        assert!(b.get("k").expect("get").is_some());

        // Propagated delete removes it on the peer too.
        b.delete("k").expect("delete");
        assert!(a.get("k").expect("get").is_none());
        assert!(b.get("k").expect("get").is_none());
    }

    #[test]
    fn sync_now_honours_the_delta_flag() {
        let (clock, millis) = FixedClock::new(3_000_000);
        let a: Collection<Squirrel> = CollectionBuilder::new(Box::new(MemoryBackend::new()))
            .node_id("a")
            .clock(Box::new(clock))
            .without_sweeper()
            .open()
            .expect("open");
        let b = open("b");

        // Records written before any entanglement never replicated live.
        a.put(squirrel("early-1", "e1", 1)).expect("put");
        a.put(squirrel("early-2", "e2", 2)).expect("put");

        a.entangle_peer(
            Arc::new(super::in_process_peer_to(&b)),
            crate::sync::SyncMode::PushOnly,
        );
        for tangle in a.tangles() {
            tangle.set_delta_sync(true);
        }

        millis.store(3_000_100, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(a.sync_now(), 2);
        assert_eq!(b.count(), 2);

        // Delta: a second sync has nothing newer than the last one.
        millis.store(3_000_200, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(a.sync_now(), 0);

        // Live puts replicate as they happen.
        millis.store(3_000_300, std::sync::atomic::Ordering::Relaxed);
        a.put(squirrel("late", "l", 3)).expect("put");
        assert_eq!(b.count(), 3);

        // Without the delta flag a sync re-pushes the full export, and the
        // receiver's change-id dedup keeps it idempotent.
        for tangle in a.tangles() {
            tangle.set_delta_sync(false);
        }
        millis.store(3_000_400, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(a.sync_now(), 3);
        assert_eq!(b.count(), 3);
        assert!(b.stats().deliveries_deduped >= 3);
    }

    #[test]
    fn shake_pulls_remote_state_in() {
        let a = open("a");
        let b = open("b");
        b.put(squirrel("remote-1", "r1", 1)).expect("put");
        b.put(squirrel("remote-2", "r2", 2)).expect("put");

        // Entangle after the fact: nothing has replicated yet.
        a.entangle_with(&b);
        assert_eq!(a.count(), 0);

        let merged = a.shake().expect("shake");
        assert_eq!(merged, 2);
        assert!(a.get("remote-1").expect("get").is_some());

        // A second shake finds nothing new.
        assert_eq!(a.shake().expect("shake"), 0);
    }
}
