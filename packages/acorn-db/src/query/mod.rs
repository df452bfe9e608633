//! Query model: a small predicate DSL plus ordering, paging, and hints.
//!
//! WHERE clauses are expression trees over dotted property paths and JSON
//! constants -- [`Predicate::Eq`], [`Predicate::Cmp`], [`Predicate::And`],
//! [`Predicate::Or`] -- compiled to a closure for execution. The planner
//! never trusts an index to prove a predicate: index results are always
//! re-checked against the compiled form.
//!
//! The analyzer ([`Predicate::conditions`]) extracts the flat list of
//! `(property, op, constant)` conditions reachable through top-level
//! conjunctions; disjunctions contribute nothing (only the full scan can
//! serve them) but still evaluate correctly through the compiled predicate.

pub mod plan;
pub mod planner;

use crate::index::key::{extract_path, IndexKey};

/// Comparison operators the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `≠`
    Ne,
    /// `<`
    Lt,
    /// `≤`
    Le,
    /// `>`
    Gt,
    /// `≥`
    Ge,
}

impl CmpOp {
    /// Evaluates the operator over totally ordered index keys.
    #[must_use]
    pub fn eval(self, left: &IndexKey, right: &IndexKey) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }

    /// Display form for explanations.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A WHERE expression tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `property = constant`
    Eq(String, serde_json::Value),
    /// `property <op> constant`
    Cmp(String, CmpOp, serde_json::Value),
    /// Every branch must hold.
    And(Vec<Predicate>),
    /// At least one branch must hold.
    Or(Vec<Predicate>),
}

/// One analyzable condition extracted from a predicate.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Dotted property path.
    pub property: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// The constant operand, as an index key.
    pub value: IndexKey,
    /// Whether the operand is a constant. Always true in this DSL, where
    /// closure-captured values are materialized at build time; kept so the
    /// plan can report it.
    pub is_constant: bool,
}

/// Compiled predicate, evaluated against a document's JSON projection.
pub type CompiledPredicate = Box<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

impl Predicate {
    /// `property = value`
    #[must_use]
    pub fn eq(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Eq(property.into(), value.into())
    }

    /// `property != value`
    #[must_use]
    pub fn ne(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Cmp(property.into(), CmpOp::Ne, value.into())
    }

    /// `property < value`
    #[must_use]
    pub fn lt(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Cmp(property.into(), CmpOp::Lt, value.into())
    }

    /// `property <= value`
    #[must_use]
    pub fn le(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Cmp(property.into(), CmpOp::Le, value.into())
    }

    /// `property > value`
    #[must_use]
    pub fn gt(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Cmp(property.into(), CmpOp::Gt, value.into())
    }

    /// `property >= value`
    #[must_use]
    pub fn ge(property: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Cmp(property.into(), CmpOp::Ge, value.into())
    }

    /// Conjunction of `branches`.
    #[must_use]
    pub fn and(branches: impl IntoIterator<Item = Self>) -> Self {
        Self::And(branches.into_iter().collect())
    }

    /// Disjunction of `branches`.
    #[must_use]
    pub fn or(branches: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(branches.into_iter().collect())
    }

    /// Evaluates the predicate against a document's JSON projection.
    #[must_use]
    pub fn matches(&self, doc: &serde_json::Value) -> bool {
        match self {
            Self::Eq(property, constant) => {
                extract_path(doc, property) == IndexKey::from_json(constant)
            }
            Self::Cmp(property, op, constant) => {
                op.eval(&extract_path(doc, property), &IndexKey::from_json(constant))
            }
            Self::And(branches) => branches.iter().all(|b| b.matches(doc)),
            Self::Or(branches) => branches.iter().any(|b| b.matches(doc)),
        }
    }

    /// Compiles to a closure for repeated evaluation.
    #[must_use]
    pub fn compile(&self) -> CompiledPredicate {
        let predicate = self.clone();
        Box::new(move |doc| predicate.matches(doc))
    }

    /// Extracts analyzable conditions from top-level conjunctions.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions(&self, out: &mut Vec<Condition>) {
        match self {
            Self::Eq(property, constant) => out.push(Condition {
                property: property.clone(),
                op: CmpOp::Eq,
                value: IndexKey::from_json(constant),
                is_constant: true,
            }),
            Self::Cmp(property, op, constant) => out.push(Condition {
                property: property.clone(),
                op: *op,
                value: IndexKey::from_json(constant),
                is_constant: true,
            }),
            Self::And(branches) => {
                for branch in branches {
                    branch.collect_conditions(out);
                }
            }
            // A disjunction cannot be served by one index; the compiled
            // predicate still enforces it after the scan.
            Self::Or(_) => {}
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

/// ORDER BY clause: a property path and a direction.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// Dotted property path to order by.
    pub property: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Ascending order on `property`.
    #[must_use]
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: OrderDirection::Ascending,
        }
    }

    /// Descending order on `property`.
    #[must_use]
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: OrderDirection::Descending,
        }
    }
}

/// Sorts `(id, doc)` pairs by the ORDER BY property, deterministically:
/// equal keys tie-break by id, both directions.
pub fn sort_results(rows: &mut [(String, serde_json::Value)], order: &OrderBy) {
    rows.sort_by(|a, b| {
        let ka = extract_path(&a.1, &order.property);
        let kb = extract_path(&b.1, &order.property);
        let by_key = match order.direction {
            OrderDirection::Ascending => ka.cmp(&kb),
            OrderDirection::Descending => kb.cmp(&ka),
        };
        by_key.then_with(|| a.0.cmp(&b.0))
    });
}
