//! Resilient decorator: retry, optional fallback, and a circuit breaker.
//!
//! Wraps any backend with three layers of failure handling:
//!
//! 1. **Retry** -- transient failures are retried up to `max_attempts`.
//! 2. **Fallback** -- when the primary is exhausted, the operation is
//!    replayed against an optional fallback backend.
//! 3. **Circuit breaker** -- after `failure_threshold` consecutive primary
//!    failures the breaker opens and calls fail fast with `CircuitOpen`
//!    until `cooldown` elapses; the first trial call in Half-Open state
//!    closes the breaker on success or re-opens it on failure.
//!
//! Non-transient errors (`Unsupported`, `Corrupt`, …) pass through without
//! retry and do not trip the breaker.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use acorn_core::record::RecordMeta;
use acorn_core::{AcornError, Result};

use super::{Backend, Capabilities, EntryIter, StoredEntry};

/// Tuning knobs for [`ResilientBackend`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Attempts per operation against the primary, including the first.
    pub max_attempts: u32,
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a Half-Open trial.
    pub cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow to the primary.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Retry + fallback + circuit breaker around a primary backend.
pub struct ResilientBackend {
    primary: Box<dyn Backend>,
    fallback: Option<Box<dyn Backend>>,
    config: ResilienceConfig,
    breaker: Mutex<Breaker>,
}

impl ResilientBackend {
    /// Wraps `primary` with the default configuration and no fallback.
    #[must_use]
    pub fn new(primary: Box<dyn Backend>) -> Self {
        Self::with_config(primary, None, ResilienceConfig::default())
    }

    /// Wraps `primary` with an explicit fallback and configuration.
    #[must_use]
    pub fn with_config(
        primary: Box<dyn Backend>,
        fallback: Option<Box<dyn Backend>>,
        config: ResilienceConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            breaker: Mutex::new(Breaker {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current breaker state, resolving an elapsed cooldown to Half-Open.
    pub fn breaker_state(&self) -> BreakerState {
        let mut breaker = self.breaker.lock();
        self.resolve_state(&mut breaker);
        breaker.state
    }

    /// Moves Open to Half-Open once the cooldown has elapsed.
    fn resolve_state(&self, breaker: &mut Breaker) {
        if breaker.state == BreakerState::Open {
            let expired = breaker
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.cooldown);
            if expired {
                breaker.state = BreakerState::HalfOpen;
            }
        }
    }

    /// Runs `op` against the primary under retry + breaker accounting, then
    /// falls back if configured.
    fn guarded<T>(&self, op: &dyn Fn(&dyn Backend) -> Result<T>) -> Result<T> {
        match self.try_primary(op) {
            Ok(value) => Ok(value),
            // Only outages divert to the fallback; contract errors would
            // just repeat against a store holding different data.
            Err(primary_err) if primary_err.is_transient() => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(
                        error = %primary_err,
                        "primary backend exhausted; using fallback"
                    );
                    op(fallback.as_ref())
                }
                None => Err(primary_err),
            },
            Err(primary_err) => Err(primary_err),
        }
    }

    fn try_primary<T>(&self, op: &dyn Fn(&dyn Backend) -> Result<T>) -> Result<T> {
        {
            let mut breaker = self.breaker.lock();
            self.resolve_state(&mut breaker);
            if breaker.state == BreakerState::Open {
                return Err(AcornError::CircuitOpen);
            }
        }

        let mut last_err = None;
        for attempt in 1..=self.config.max_attempts {
            match op(self.primary.as_ref()) {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(attempt, error = %err, "transient backend failure");
                    last_err = Some(err);
                }
                // Contract errors don't heal on retry and don't trip the breaker.
                Err(err) => return Err(err),
            }
        }

        self.on_failure();
        Err(last_err.unwrap_or(AcornError::CircuitOpen))
    }

    fn on_success(&self) {
        let mut breaker = self.breaker.lock();
        if breaker.state == BreakerState::HalfOpen {
            tracing::info!("circuit breaker closed after successful trial");
        }
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
        breaker.opened_at = None;
    }

    fn on_failure(&self) {
        let mut breaker = self.breaker.lock();
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        let tripped = breaker.state == BreakerState::HalfOpen
            || breaker.consecutive_failures >= self.config.failure_threshold;
        if tripped {
            if breaker.state != BreakerState::Open {
                tracing::warn!(
                    consecutive_failures = breaker.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            breaker.state = BreakerState::Open;
            breaker.opened_at = Some(Instant::now());
        }
    }
}

impl Backend for ResilientBackend {
    fn save(&self, id: &str, body: &[u8], meta: &RecordMeta) -> Result<()> {
        self.guarded(&|b| b.save(id, body, meta))
    }

    fn load(&self, id: &str) -> Result<Option<StoredEntry>> {
        self.guarded(&|b| b.load(id))
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.guarded(&|b| b.delete(id))
    }

    fn load_all(&self) -> Result<EntryIter<'_>> {
        // Iterators borrow the producing backend, so the guarded closure
        // materializes before returning.
        let items =
            self.guarded(&|b| b.load_all().and_then(|iter| iter.collect::<Result<Vec<_>>>()))?;
        Ok(Box::new(items.into_iter().map(Ok)))
    }

    fn export_changes(&self) -> Result<Vec<(String, StoredEntry)>> {
        self.guarded(&|b| b.export_changes())
    }

    fn history(&self, id: &str) -> Result<Vec<StoredEntry>> {
        self.guarded(&|b| b.history(id))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            trunk_kind: "resilient",
            ..self.primary.capabilities()
        }
    }
}
