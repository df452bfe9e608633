//! Record model: the unit stored, cached, indexed, and replicated.
//!
//! A [`Record`] couples a typed payload with its [`RecordMeta`]: creation
//! instant, optional expiry, version, and the replication identity
//! (`change_id`, `origin_node_id`, `hop_count`) that mesh loop prevention
//! keys on. [`StoredRecord`] is the JSON wire envelope exchanged with
//! backends and remote peers; unknown fields are tolerated on read and
//! carried back out on write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Replication and lifecycle metadata attached to every record.
///
/// Serialized alongside the payload wherever the record travels. The
/// `change_id` is assigned once per logical mutation at the origin node and
/// preserved across hops; `hop_count` increments on each peer-to-peer relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Creation-or-last-update instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// When present and `<= now`, the record is logically absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Starts at 1, incremented on every replace.
    pub version: u64,
    /// Globally unique identifier of the logical mutation.
    pub change_id: Uuid,
    /// Node where the mutation first occurred.
    pub origin_node_id: String,
    /// Number of peer-to-peer relays this record has undergone.
    pub hop_count: u32,
}

impl RecordMeta {
    /// Metadata for the first version of a record, minted at `origin_node_id`.
    #[must_use]
    pub fn first(timestamp: DateTime<Utc>, origin_node_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            expires_at: None,
            version: 1,
            change_id: Uuid::new_v4(),
            origin_node_id: origin_node_id.into(),
            hop_count: 0,
        }
    }

    /// Metadata for a replacement write: version bumps, a fresh `change_id`
    /// is minted, and hop count resets to zero (this node is the new origin
    /// of the mutation).
    #[must_use]
    pub fn replacing(
        previous: &Self,
        timestamp: DateTime<Utc>,
        origin_node_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            expires_at: previous.expires_at,
            version: previous.version.saturating_add(1),
            change_id: Uuid::new_v4(),
            origin_node_id: origin_node_id.into(),
            hop_count: 0,
        }
    }

    /// True when the record is logically absent at `now`.
    ///
    /// A missing `expires_at` never expires; an `expires_at` exactly equal
    /// to `now` is already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A typed record: id, payload, metadata, plus any extra wire fields that
/// arrived with it.
#[derive(Debug, Clone)]
pub struct Record<T> {
    /// Primary key. Non-empty.
    pub id: String,
    /// The document value.
    pub payload: T,
    /// Lifecycle and replication metadata.
    pub meta: RecordMeta,
    /// Unknown wire fields preserved for re-propagation.
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl<T> Record<T> {
    /// Assembles a fresh version-1 record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        payload: T,
        timestamp: DateTime<Utc>,
        origin_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            meta: RecordMeta::first(timestamp, origin_node_id),
            extras: BTreeMap::new(),
        }
    }

    /// Returns a copy with `hop_count` incremented, for relaying onward.
    #[must_use]
    pub fn relayed(&self) -> Self
    where
        T: Clone,
    {
        let mut next = self.clone();
        next.meta.hop_count = next.meta.hop_count.saturating_add(1);
        next
    }
}

impl<T: Serialize> Record<T> {
    /// Converts to the JSON wire envelope.
    ///
    /// # Errors
    ///
    /// Fails with [`Corrupt`](crate::AcornError::Corrupt) if the payload is
    /// not JSON-serializable.
    pub fn to_stored(&self) -> Result<StoredRecord> {
        Ok(StoredRecord {
            id: self.id.clone(),
            payload: serde_json::to_value(&self.payload)?,
            timestamp: self.meta.timestamp,
            expires_at: self.meta.expires_at,
            version: self.meta.version,
            change_id: self.meta.change_id,
            origin_node_id: self.meta.origin_node_id.clone(),
            hop_count: self.meta.hop_count,
            extras: self.extras.clone(),
        })
    }
}

impl<T: DeserializeOwned> Record<T> {
    /// Reconstructs a typed record from the wire envelope.
    ///
    /// # Errors
    ///
    /// Fails with [`Corrupt`](crate::AcornError::Corrupt) if the payload does
    /// not deserialize into `T`.
    pub fn from_stored(stored: StoredRecord) -> Result<Self> {
        Ok(Self {
            id: stored.id,
            payload: serde_json::from_value(stored.payload)?,
            meta: RecordMeta {
                timestamp: stored.timestamp,
                expires_at: stored.expires_at,
                version: stored.version,
                change_id: stored.change_id,
                origin_node_id: stored.origin_node_id,
                hop_count: stored.hop_count,
            },
            extras: stored.extras,
        })
    }
}

/// The JSON wire envelope for a record.
///
/// Timestamps serialize as ISO-8601 / RFC 3339 UTC strings, the change id as
/// a UUID string. Fields beyond the schema collect into `extras` on read and
/// flatten back out on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Primary key.
    pub id: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Creation-or-last-update instant.
    pub timestamp: DateTime<Utc>,
    /// Optional expiry instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Version, `>= 1`.
    pub version: u64,
    /// Mutation identity for mesh dedup.
    pub change_id: Uuid,
    /// Node where the mutation first occurred.
    pub origin_node_id: String,
    /// Relay count.
    pub hop_count: u32,
    /// Unrecognized wire fields, preserved round-trip.
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl StoredRecord {
    /// The metadata portion of the envelope.
    #[must_use]
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            timestamp: self.timestamp,
            expires_at: self.expires_at,
            version: self.version,
            change_id: self.change_id,
            origin_node_id: self.origin_node_id.clone(),
            hop_count: self.hop_count,
        }
    }

    /// Builds an envelope from a JSON payload and its metadata.
    #[must_use]
    pub fn from_parts(id: impl Into<String>, payload: serde_json::Value, meta: RecordMeta) -> Self {
        Self {
            id: id.into(),
            payload,
            timestamp: meta.timestamp,
            expires_at: meta.expires_at,
            version: meta.version,
            change_id: meta.change_id,
            origin_node_id: meta.origin_node_id,
            hop_count: meta.hop_count,
            extras: BTreeMap::new(),
        }
    }
}
