//! Totally ordered index keys extracted from a document's JSON projection.
//!
//! [`IndexKey`] is the comparable value an index orders by. The variant
//! order defines a cross-type total order (`Null < Bool < Number < String`),
//! numbers compare through [`OrderedFloat`] so `NaN` cannot poison the
//! ordering, and string keys can opt into case-insensitive folding at the
//! index level. Arrays and objects index by their compact JSON rendering,
//! which is deterministic if rarely what you want -- index scalar
//! properties.

use std::fmt;

use ordered_float::OrderedFloat;

/// A comparable index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Missing or explicit-null property.
    Null,
    /// Boolean property.
    Bool(bool),
    /// Numeric property; integers and floats share one ordering.
    Number(OrderedFloat<f64>),
    /// String property.
    Str(String),
}

impl IndexKey {
    /// Extracts a key from a JSON value.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                Self::Number(OrderedFloat(n.as_f64().unwrap_or(f64::NAN)))
            }
            serde_json::Value::String(s) => Self::Str(s.clone()),
            // Deterministic fallback for structured values.
            other => Self::Str(other.to_string()),
        }
    }

    /// Key for a string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Key for a numeric value.
    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::Number(OrderedFloat(n))
    }

    /// Lowercases string keys; other variants pass through.
    #[must_use]
    pub fn fold_case(self) -> Self {
        match self {
            Self::Str(s) => Self::Str(s.to_lowercase()),
            other => other,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Reads the property at a dotted `path` out of a document's JSON
/// projection. A missing segment yields [`IndexKey::Null`], so documents
/// without the property still index (under null) and unique checks can see
/// them.
#[must_use]
pub fn extract_path(doc: &serde_json::Value, path: &str) -> IndexKey {
    let mut current = doc;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return IndexKey::Null,
        }
    }
    IndexKey::from_json(current)
}
