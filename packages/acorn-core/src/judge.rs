//! Conflict judges: deterministic winner selection for colliding versions.
//!
//! When replication delivers a record for an id that already exists locally,
//! a [`ConflictJudge`] picks the survivor. Judges are pure: same inputs,
//! same verdict, no side effects. The default [`TimestampJudge`] keeps the
//! later write and favours the local copy on exact ties, so two nodes
//! judging the same pair always converge on the same record.

use crate::record::Record;

/// Verdict of a conflict judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the record already present locally.
    Local,
    /// Adopt the incoming record.
    Incoming,
}

/// Per-peer override for conflict handling.
///
/// `UseJudge` defers to the collection's configured judge; the other two
/// bypass it with a fixed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictDirection {
    /// The local record always wins.
    PreferLocal,
    /// The incoming record always wins.
    PreferRemote,
    /// Defer to the collection's judge.
    #[default]
    UseJudge,
}

/// Pure function from `(local, incoming)` to a [`Winner`].
pub trait ConflictJudge<T>: Send + Sync {
    /// Name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Picks the surviving record.
    fn judge(&self, local: &Record<T>, incoming: &Record<T>) -> Winner;
}

/// Later `timestamp` wins; exact ties favour local. The default judge.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampJudge;

impl<T> ConflictJudge<T> for TimestampJudge {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn judge(&self, local: &Record<T>, incoming: &Record<T>) -> Winner {
        if incoming.meta.timestamp > local.meta.timestamp {
            Winner::Incoming
        } else {
            Winner::Local
        }
    }
}

/// The local record always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferLocalJudge;

impl<T> ConflictJudge<T> for PreferLocalJudge {
    fn name(&self) -> &'static str {
        "prefer-local"
    }

    fn judge(&self, _local: &Record<T>, _incoming: &Record<T>) -> Winner {
        Winner::Local
    }
}

/// The incoming record always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferRemoteJudge;

impl<T> ConflictJudge<T> for PreferRemoteJudge {
    fn name(&self) -> &'static str {
        "prefer-remote"
    }

    fn judge(&self, _local: &Record<T>, _incoming: &Record<T>) -> Winner {
        Winner::Incoming
    }
}
