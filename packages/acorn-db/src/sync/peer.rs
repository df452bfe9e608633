//! Peer endpoints: where deliveries go.
//!
//! A [`Peer`] is the replication counterpart a tangle talks to. Two kinds
//! ship:
//!
//! - [`InProcessPeer`]: holds a weak reference to another collection (via
//!   the [`DeliveryTarget`] seam) and calls straight into it. Weak, so
//!   entangled collections never keep each other alive and disposal stays
//!   one-way.
//! - [`RemotePeer`]: adapts a [`RemoteTransport`] -- the abstract remote
//!   with exactly two call shapes, `push(id, record)` and `fetch_all()` --
//!   translating typed records to and from the JSON wire envelope.
//!
//! Deletes travel with the same change-id machinery as upserts. The remote
//! transport has no delete operation, so a remote delete is pushed as an
//! envelope with a null payload and a `deleted: true` extra field, which
//! tolerant readers pass through and AcornDB remotes understand.

use std::sync::Weak;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use acorn_core::record::{Record, RecordMeta, StoredRecord};
use acorn_core::{AcornError, Result};

/// Extra-field marker for delete envelopes on the remote wire.
pub const DELETED_MARKER: &str = "deleted";

/// One replication delivery.
#[derive(Debug, Clone)]
pub enum Delivery<T> {
    /// Insert-or-update of a record.
    Upsert(Record<T>),
    /// Deletion, carrying the same loop-prevention identity as an upsert.
    Delete {
        /// Id of the deleted record.
        id: String,
        /// Mutation identity for mesh dedup.
        change_id: Uuid,
        /// Node where the delete originated.
        origin_node_id: String,
        /// Relay count.
        hop_count: u32,
    },
}

impl<T> Delivery<T> {
    /// The mutation's change id.
    #[must_use]
    pub fn change_id(&self) -> Uuid {
        match self {
            Self::Upsert(record) => record.meta.change_id,
            Self::Delete { change_id, .. } => *change_id,
        }
    }

    /// The node the mutation originated on.
    #[must_use]
    pub fn origin_node_id(&self) -> &str {
        match self {
            Self::Upsert(record) => &record.meta.origin_node_id,
            Self::Delete { origin_node_id, .. } => origin_node_id,
        }
    }

    /// Relay count so far.
    #[must_use]
    pub fn hop_count(&self) -> u32 {
        match self {
            Self::Upsert(record) => record.meta.hop_count,
            Self::Delete { hop_count, .. } => *hop_count,
        }
    }

    /// Copy with the hop count incremented, for relaying onward.
    #[must_use]
    pub fn relayed(&self) -> Self
    where
        T: Clone,
    {
        match self {
            Self::Upsert(record) => Self::Upsert(record.relayed()),
            Self::Delete {
                id,
                change_id,
                origin_node_id,
                hop_count,
            } => Self::Delete {
                id: id.clone(),
                change_id: *change_id,
                origin_node_id: origin_node_id.clone(),
                hop_count: hop_count.saturating_add(1),
            },
        }
    }
}

/// The receiving side of an in-process entanglement.
///
/// Implemented by the collection core; kept as a seam so peers are testable
/// without one.
pub trait DeliveryTarget<T>: Send + Sync {
    /// Node id of the receiving collection.
    fn node_id(&self) -> String;

    /// Applies a delivery from `from_node`. Returns whether it was accepted
    /// (passed loop prevention and was processed).
    ///
    /// # Errors
    ///
    /// Backend failures while storing the accepted record.
    fn apply_delivery(&self, delivery: Delivery<T>, from_node: &str) -> Result<bool>;

    /// All current records, for pull-style sync.
    ///
    /// # Errors
    ///
    /// Backend failures while exporting.
    fn export_records(&self) -> Result<Vec<Record<T>>>;
}

/// A replication endpoint.
pub trait Peer<T>: Send + Sync {
    /// Identity of the node behind this peer, used to exclude the deliverer
    /// when relaying and to dedupe entanglements.
    fn remote_node_id(&self) -> String;

    /// Delivers a mutation. Best-effort: failures are counted by the
    /// tangle, never surfaced to the local writer.
    ///
    /// # Errors
    ///
    /// Whatever the endpoint reports; the caller treats it as a push
    /// failure statistic.
    fn deliver(&self, delivery: Delivery<T>, from_node: &str) -> Result<()>;

    /// Pulls every record the peer currently holds.
    ///
    /// # Errors
    ///
    /// Endpoint-specific fetch failures.
    fn fetch_all(&self) -> Result<Vec<Record<T>>>;

    /// Whether the other side is still reachable at all (an in-process
    /// target that was dropped is not).
    fn is_alive(&self) -> bool {
        true
    }
}

/// Peer delivering directly into another collection in this process.
pub struct InProcessPeer<T> {
    target: Weak<dyn DeliveryTarget<T>>,
    target_node_id: String,
}

impl<T> InProcessPeer<T> {
    /// Peer for the given target.
    #[must_use]
    pub fn new(target_node_id: String, target: Weak<dyn DeliveryTarget<T>>) -> Self {
        Self {
            target,
            target_node_id,
        }
    }

    fn upgrade(&self) -> Result<std::sync::Arc<dyn DeliveryTarget<T>>> {
        self.target
            .upgrade()
            .ok_or(AcornError::Disposed("entangled collection"))
    }
}

impl<T: Send + Sync> Peer<T> for InProcessPeer<T> {
    fn remote_node_id(&self) -> String {
        self.target_node_id.clone()
    }

    fn deliver(&self, delivery: Delivery<T>, from_node: &str) -> Result<()> {
        self.upgrade()?.apply_delivery(delivery, from_node)?;
        Ok(())
    }

    fn fetch_all(&self) -> Result<Vec<Record<T>>> {
        self.upgrade()?.export_records()
    }

    fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

/// The abstract remote the core pushes to and pulls from.
///
/// How this maps to a transport (HTTP, IPC, a queue) is the surrounding
/// code's concern; the core only needs these two call shapes and the wire
/// envelope.
pub trait RemoteTransport: Send + Sync {
    /// Name identifying the remote node.
    fn remote_name(&self) -> String;

    /// Pushes one record envelope. Best-effort; must not block indefinitely.
    ///
    /// # Errors
    ///
    /// Transport failures, surfaced to the tangle as push-failure counts.
    fn push(&self, id: &str, record: &StoredRecord) -> Result<()>;

    /// Fetches every record the remote holds.
    ///
    /// # Errors
    ///
    /// Transport failures.
    fn fetch_all(&self) -> Result<Vec<StoredRecord>>;
}

/// Peer adapting a [`RemoteTransport`].
pub struct RemotePeer<T> {
    transport: Box<dyn RemoteTransport>,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T> RemotePeer<T> {
    /// Peer over the given transport.
    #[must_use]
    pub fn new(transport: Box<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            _payload: std::marker::PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Peer<T> for RemotePeer<T> {
    fn remote_node_id(&self) -> String {
        self.transport.remote_name()
    }

    fn deliver(&self, delivery: Delivery<T>, _from_node: &str) -> Result<()> {
        match delivery {
            Delivery::Upsert(record) => {
                let stored = record.to_stored()?;
                self.transport.push(&record.id, &stored)
            }
            Delivery::Delete {
                id,
                change_id,
                origin_node_id,
                hop_count,
            } => {
                let meta = RecordMeta {
                    // Delete envelopes are minted at push time; the change
                    // id, not this instant, is what receivers dedup on.
                    timestamp: Utc::now(),
                    expires_at: None,
                    version: 1,
                    change_id,
                    origin_node_id,
                    hop_count,
                };
                let mut stored =
                    StoredRecord::from_parts(id.clone(), serde_json::Value::Null, meta);
                stored
                    .extras
                    .insert(DELETED_MARKER.to_string(), serde_json::Value::Bool(true));
                self.transport.push(&id, &stored)
            }
        }
    }

    fn fetch_all(&self) -> Result<Vec<Record<T>>> {
        let mut records = Vec::new();
        for stored in self.transport.fetch_all()? {
            // Delete envelopes carry no payload to merge.
            if stored.extras.get(DELETED_MARKER) == Some(&serde_json::Value::Bool(true)) {
                continue;
            }
            records.push(Record::from_stored(stored)?);
        }
        Ok(records)
    }
}
