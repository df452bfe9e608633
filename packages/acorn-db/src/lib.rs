//! AcornDB engine -- an embeddable, replicating document store.
//!
//! Each [`Collection`] owns a typed document set over a pluggable durable
//! backend and composes the crate's subsystems:
//!
//! - **Backends** ([`backend`]): memory, file-per-key, append-only log,
//!   B-tree (`redb`), plus cached / resilient / near-far wrappers
//! - **Root pipeline** ([`pipeline`]): ordered byte transforms on every
//!   read and write -- compression, encryption, policy, hooks
//! - **Cache** ([`cache`]): working-set eviction strategies
//! - **TTL** ([`ttl`]): background expiry sweeping
//! - **Indexes** ([`index`]) and the cost-based **planner** ([`query`])
//! - **Replication** ([`sync`]): peers, tangles, mesh loop prevention,
//!   delta sync
//! - **Events** ([`events`]): reactive change subscriptions
//! - **Grove** ([`grove`]): type-tagged registry of collections
//!
//! # Example
//!
//! ```
//! use acorn_db::backend::memory::MemoryBackend;
//! use acorn_db::builder::CollectionBuilder;
//! use acorn_db::collection::Collection;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Squirrel {
//!     id: String,
//!     nuts: u32,
//! }
//!
//! let collection: Collection<Squirrel> =
//!     CollectionBuilder::new(Box::new(MemoryBackend::new()))
//!         .open()
//!         .unwrap();
//!
//! collection
//!     .put(Squirrel { id: "hazel".into(), nuts: 3 })
//!     .unwrap();
//! assert_eq!(collection.get("hazel").unwrap().unwrap().nuts, 3);
//! ```

pub mod backend;
pub mod builder;
pub mod cache;
pub mod collection;
pub mod events;
pub mod grove;
pub mod index;
pub mod pipeline;
pub mod query;
pub mod stats;
pub mod sync;
pub mod ttl;

// Collection
pub use builder::CollectionBuilder;
pub use collection::{Collection, CollectionConfig, CollectionQuery, Document};

// Backends
pub use backend::{Backend, Capabilities, StoredEntry};

// Cache
pub use cache::{CachePolicy, CacheStrategy, LruStrategy, NoEviction};

// Indexes & query
pub use index::composite::CompositeIndexSpec;
pub use index::scalar::ScalarIndexSpec;
pub use index::IndexKey;
pub use query::plan::{PlanStrategy, QueryPlan};
pub use query::{OrderBy, Predicate};

// Replication
pub use grove::{CollectionHandle, Grove};
pub use sync::mesh::{entangle_all, entangle_star};
pub use sync::{Delivery, Peer, RemoteTransport, SyncMode, Tangle};

// Re-exported foundation types callers need constantly.
pub use acorn_core::{
    AcornError, ConflictDirection, IdExtractor, Identified, Record, Result, StoredRecord, Winner,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    /// Verify all re-exports are accessible from the crate root.
    #[test]
    fn reexports_accessible() {
        let _ = CachePolicy::NoEviction;
        let _ = SyncMode::Bidirectional;
        let _ = PlanStrategy::FullScan;
        let _ = Predicate::eq("field", 1);
        let _ = ScalarIndexSpec::on("field");
        let _ = ConflictDirection::UseJudge;
        let _ = Grove::new();
    }
}
