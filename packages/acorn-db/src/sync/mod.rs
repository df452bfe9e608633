//! Replication fabric: peers, tangles, loop prevention, delta sync.
//!
//! A collection replicates by *entangling* with peers. Each entanglement is
//! a [`Tangle`](tangle::Tangle): the peer endpoint plus its sync mode,
//! conflict override, delta-sync flag, statistics, and disposed state.
//! Endpoints are either in-process (delivering straight into another
//! collection) or remote (adapting a [`RemoteTransport`](peer::RemoteTransport)
//! with the two abstract operations `push` and `fetch_all`).
//!
//! Loop prevention is change-id based: every mutation carries a globally
//! unique `change_id`, the node where it originated, and a hop count. A
//! delivery is applied iff the change id is unseen, the origin is not the
//! receiving node, and the hop count is under the limit; accepted deliveries
//! are relayed to every peer except the one that delivered them. The
//! [`SeenChanges`](seen::SeenChanges) set is a bounded FIFO so a full mesh
//! of any size converges with exactly one apply per node per mutation.

pub mod mesh;
pub mod peer;
pub mod seen;
pub mod tangle;

pub use peer::{Delivery, DeliveryTarget, InProcessPeer, Peer, RemotePeer, RemoteTransport};
pub use seen::SeenChanges;
pub use tangle::{SyncMode, Tangle, TangleStatsSnapshot};

/// Default bound on the seen-change-id set.
pub const DEFAULT_SEEN_CAPACITY: usize = 1_000;

/// Default maximum hop count for relayed records.
pub const DEFAULT_MAX_HOP_COUNT: u32 = 10;
