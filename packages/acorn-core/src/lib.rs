//! AcornDB core -- record model, clock, conflict judges, and id extraction.
//!
//! This crate is the foundation layer under the `acorn-db` engine:
//!
//! - **Clock** ([`clock`]): injectable time source plus a monotonic wrapper
//! - **Record** ([`record`]): typed records, replication metadata, and the
//!   JSON wire envelope
//! - **Judge** ([`judge`]): deterministic conflict resolution between
//!   colliding record versions
//! - **Identity** ([`identity`]): cached resolution of a document's primary
//!   key
//! - **Error** ([`error`]): the error taxonomy shared by every component

pub mod clock;
pub mod error;
pub mod identity;
pub mod judge;
pub mod record;

// Clock
pub use clock::{ClockSource, MonotonicClock, SystemClock};

// Error
pub use error::{AcornError, Result};

// Identity
pub use identity::{IdExtractor, Identified};

// Judge
pub use judge::{
    ConflictDirection, ConflictJudge, PreferLocalJudge, PreferRemoteJudge, TimestampJudge, Winner,
};

// Record
pub use record::{Record, RecordMeta, StoredRecord};
