//! Query plan structures: what the planner chose and why.
//!
//! A [`QueryPlan`] names the selected index (if any), the access strategy,
//! the estimated cost and row counts, a human-readable explanation, and the
//! full candidate list the planner considered. `explain()` on a query
//! returns the plan without executing; [`QueryPlan::explain_string`]
//! formats it.

use crate::index::key::IndexKey;

/// How the executor will touch the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStrategy {
    /// Iterate every record and test the predicate.
    FullScan,
    /// Point lookup(s) in one index.
    IndexSeek,
    /// Bounded scan over one index's key order.
    IndexRangeScan,
    /// Walk one index in key order, for ORDER BY only.
    IndexScan,
    /// Intersect the id sets of several index lookups.
    IndexMerge,
}

impl PlanStrategy {
    /// Display name used in explanations.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FullScan => "FullScan",
            Self::IndexSeek => "IndexSeek",
            Self::IndexRangeScan => "IndexRangeScan",
            Self::IndexScan => "IndexScan",
            Self::IndexMerge => "IndexMerge",
        }
    }
}

/// Executable description of the chosen access path.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexAccess {
    /// Iterate the whole collection (in id order, for determinism).
    FullScan,
    /// Exact lookup of `components` in `index`.
    Seek {
        /// Index to seek in.
        index: String,
        /// Key components, one per indexed property served.
        components: Vec<IndexKey>,
    },
    /// Inclusive range over the component after `prefix` in `index`.
    Range {
        /// Index to scan.
        index: String,
        /// Fixed leading components (empty for scalar indexes).
        prefix: Vec<IndexKey>,
        /// Lower bound; `None` means the index minimum.
        min: Option<IndexKey>,
        /// Upper bound; `None` means the index maximum.
        max: Option<IndexKey>,
    },
    /// Ordered walk of `index`.
    Sorted {
        /// Index to walk.
        index: String,
        /// Walk direction.
        ascending: bool,
    },
    /// Intersect exact lookups across several indexes.
    Merge {
        /// `(index, components)` lookups to intersect.
        lookups: Vec<(String, Vec<IndexKey>)>,
    },
}

/// One option the planner weighed.
#[derive(Debug, Clone)]
pub struct PlanCandidate {
    /// Index considered, or `"<full scan>"`.
    pub index: String,
    /// Strategy the candidate would use.
    pub strategy: PlanStrategy,
    /// Estimated cost; lower is better.
    pub cost: f64,
    /// Why the candidate costs what it costs.
    pub reason: String,
}

/// The planner's decision.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Selected index; `None` means full scan.
    pub index: Option<String>,
    /// Selected strategy.
    pub strategy: PlanStrategy,
    /// Estimated cost of the selected candidate.
    pub cost: f64,
    /// Estimated rows the executor will examine.
    pub estimated_rows_examined: usize,
    /// Estimated rows the query will return.
    pub estimated_rows_returned: usize,
    /// One-line rationale for the selection.
    pub explanation: String,
    /// Every candidate considered, selected one included.
    pub candidates: Vec<PlanCandidate>,
    /// Executable access description for the selected candidate.
    pub access: IndexAccess,
}

impl QueryPlan {
    /// Multi-line rendering of the plan, one candidate per line.
    #[must_use]
    pub fn explain_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "plan: {} via {} (cost {:.2}, ~{} examined, ~{} returned)\n",
            self.strategy.label(),
            self.index.as_deref().unwrap_or("<full scan>"),
            self.cost,
            self.estimated_rows_examined,
            self.estimated_rows_returned,
        ));
        out.push_str(&format!("  {}\n", self.explanation));
        out.push_str("candidates:\n");
        for candidate in &self.candidates {
            out.push_str(&format!(
                "  {} [{}] cost {:.2}: {}\n",
                candidate.index,
                candidate.strategy.label(),
                candidate.cost,
                candidate.reason,
            ));
        }
        out
    }
}
