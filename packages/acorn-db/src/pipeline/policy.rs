//! Policy root: payload validation through a pluggable policy engine.
//!
//! The root parses the payload as JSON and asks the [`PolicyEngine`] to
//! validate it; a denial fails the whole operation with `PolicyDenied` and
//! nothing is written or returned. Enforcement can be enabled per direction
//! -- write, read, or both. The bytes pass through unchanged either way, so
//! this root must sit at a position where the payload is still plaintext
//! JSON: below compression and encryption on the write path.

use std::sync::Arc;

use acorn_core::{AcornError, Result};

use super::{Root, RootContext};

/// Default pipeline position: before compression (100) and encryption (200),
/// so the engine sees plaintext on write and the fully decoded payload on
/// read.
pub const POLICY_SEQUENCE: i32 = 50;

/// Validates payloads on behalf of a [`PolicyRoot`].
pub trait PolicyEngine: Send + Sync {
    /// Engine name, used in denial reasons and logs.
    fn name(&self) -> &str;

    /// Validates the payload; `Err(reason)` denies the operation.
    ///
    /// # Errors
    ///
    /// The returned string is surfaced verbatim inside `PolicyDenied`.
    fn validate(&self, payload: &serde_json::Value, ctx: &RootContext)
        -> std::result::Result<(), String>;
}

/// Pass-through root that can deny operations via a policy engine.
pub struct PolicyRoot {
    engine: Arc<dyn PolicyEngine>,
    enforce_on_write: bool,
    enforce_on_read: bool,
    sequence: i32,
}

impl PolicyRoot {
    /// Enforces `engine` on the write path only (the common case).
    #[must_use]
    pub fn on_write_only(engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            engine,
            enforce_on_write: true,
            enforce_on_read: false,
            sequence: POLICY_SEQUENCE,
        }
    }

    /// Enforces `engine` on both directions.
    #[must_use]
    pub fn on_both(engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            engine,
            enforce_on_write: true,
            enforce_on_read: true,
            sequence: POLICY_SEQUENCE,
        }
    }

    /// Explicit per-direction enforcement flags.
    #[must_use]
    pub fn with_enforcement(
        engine: Arc<dyn PolicyEngine>,
        enforce_on_write: bool,
        enforce_on_read: bool,
    ) -> Self {
        Self {
            engine,
            enforce_on_write,
            enforce_on_read,
            sequence: POLICY_SEQUENCE,
        }
    }

    /// Overrides the pipeline position.
    #[must_use]
    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    fn check(&self, operation: &'static str, bytes: &[u8], ctx: &RootContext) -> Result<()> {
        let payload: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            AcornError::Corrupt(format!("policy root expected JSON payload: {e}"))
        })?;
        self.engine.validate(&payload, ctx).map_err(|reason| {
            tracing::debug!(
                engine = %self.engine.name(),
                operation,
                doc_id = ctx.doc_id.as_deref().unwrap_or("<none>"),
                %reason,
                "policy denied operation"
            );
            AcornError::PolicyDenied { operation, reason }
        })
    }
}

impl Root for PolicyRoot {
    fn name(&self) -> &str {
        "policy"
    }

    fn sequence(&self) -> i32 {
        self.sequence
    }

    fn on_write(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        if self.enforce_on_write {
            self.check("write", bytes, ctx)?;
        }
        Ok(bytes.to_vec())
    }

    fn on_read(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        if self.enforce_on_read {
            self.check("read", bytes, ctx)?;
        }
        Ok(bytes.to_vec())
    }
}
