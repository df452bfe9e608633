//! Id extraction: resolving a document's primary key.
//!
//! `put(doc)` without an explicit id needs a `doc -> String` resolver.
//! Resolution priority:
//!
//! 1. An explicit strategy: the [`Identified`] capability trait, or a
//!    caller-supplied closure.
//! 2. A probe over the document's JSON projection for a property named
//!    `Id`, `ID`, `Key`, `KEY`, `id`, or `key` (checked in that order);
//!    string values are used as-is, numbers are converted.
//! 3. Otherwise extraction is undefined and `put(doc)` fails with
//!    [`IdExtractionUnavailable`](crate::AcornError::IdExtractionUnavailable).
//!
//! The probe's resolved field name is cached per payload type, so the scan
//! over candidate names happens once per process per type.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{AcornError, Result};

/// Property names probed for an id, in priority order.
const ID_FIELDS: [&str; 6] = ["Id", "ID", "Key", "KEY", "id", "key"];

/// Capability trait for payload types that know their own key.
pub trait Identified {
    /// The primary key of this document. Must be non-empty.
    fn id(&self) -> String;
}

/// Per-type cache of the probe outcome: the winning field name, or `None`
/// when the type has no id-bearing property.
fn probe_cache() -> &'static DashMap<TypeId, Option<&'static str>> {
    static CACHE: OnceLock<DashMap<TypeId, Option<&'static str>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

enum Strategy<T> {
    Custom(Arc<dyn Fn(&T) -> Option<String> + Send + Sync>),
    Probe,
}

/// Cached resolver from document to primary key.
pub struct IdExtractor<T> {
    strategy: Strategy<T>,
}

impl<T> Clone for IdExtractor<T> {
    fn clone(&self) -> Self {
        let strategy = match &self.strategy {
            Strategy::Custom(f) => Strategy::Custom(Arc::clone(f)),
            Strategy::Probe => Strategy::Probe,
        };
        Self { strategy }
    }
}

impl<T> Default for IdExtractor<T> {
    fn default() -> Self {
        Self::probing()
    }
}

impl<T> IdExtractor<T> {
    /// Extractor that probes the JSON projection for a well-known id field.
    #[must_use]
    pub fn probing() -> Self {
        Self {
            strategy: Strategy::Probe,
        }
    }

    /// Extractor backed by a caller-supplied closure.
    ///
    /// Returning `None` from the closure reports the type as having no id
    /// strategy.
    #[must_use]
    pub fn custom(f: impl Fn(&T) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            strategy: Strategy::Custom(Arc::new(f)),
        }
    }

    /// Extractor for types implementing [`Identified`].
    #[must_use]
    pub fn identified() -> Self
    where
        T: Identified,
    {
        Self::custom(|doc: &T| Some(doc.id()))
    }
}

impl<T: Serialize + 'static> IdExtractor<T> {
    /// Resolves the document's id.
    ///
    /// # Errors
    ///
    /// - [`AcornError::IdExtractionUnavailable`] when no strategy applies to
    ///   this type.
    /// - [`AcornError::InvalidId`] when the extracted id is empty or
    ///   whitespace-only.
    pub fn extract(&self, doc: &T) -> Result<String> {
        let raw = match &self.strategy {
            Strategy::Custom(f) => f(doc).ok_or(AcornError::IdExtractionUnavailable {
                type_name: std::any::type_name::<T>(),
            })?,
            Strategy::Probe => probe(doc)?,
        };
        validate(raw)
    }
}

/// Probes the serialized form of `doc` for the first present id field.
fn probe<T: Serialize + 'static>(doc: &T) -> Result<String> {
    let unavailable = || AcornError::IdExtractionUnavailable {
        type_name: std::any::type_name::<T>(),
    };

    let value = serde_json::to_value(doc).map_err(|_| unavailable())?;
    let serde_json::Value::Object(map) = &value else {
        probe_cache().insert(TypeId::of::<T>(), None);
        return Err(unavailable());
    };

    // Fast path: a previous probe already picked the field for this type.
    if let Some(cached) = probe_cache().get(&TypeId::of::<T>()) {
        return match *cached {
            Some(field) => map.get(field).and_then(field_to_id).ok_or_else(unavailable),
            None => Err(unavailable()),
        };
    }

    for field in ID_FIELDS {
        if let Some(id) = map.get(field).and_then(field_to_id) {
            probe_cache().insert(TypeId::of::<T>(), Some(field));
            return Ok(id);
        }
    }

    probe_cache().insert(TypeId::of::<T>(), None);
    Err(unavailable())
}

/// Converts a readable id-bearing JSON value to a string key.
fn field_to_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rejects empty and whitespace-only ids.
pub fn validate(id: String) -> Result<String> {
    if id.trim().is_empty() {
        return Err(AcornError::InvalidId(id));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct WithId {
        id: String,
        body: u32,
    }

    #[derive(Serialize)]
    struct WithUpperKey {
        #[serde(rename = "Key")]
        key: u64,
    }

    #[derive(Serialize)]
    struct WithBoth {
        #[serde(rename = "Id")]
        upper: String,
        id: String,
    }

    #[derive(Serialize)]
    struct NoKey {
        body: u32,
    }

    struct Tagged {
        tag: u32,
    }

    impl Identified for Tagged {
        fn id(&self) -> String {
            format!("tag-{}", self.tag)
        }
    }

    impl Serialize for Tagged {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            s.serialize_u32(self.tag)
        }
    }

    #[test]
    fn probes_lowercase_id_field() {
        let extractor = IdExtractor::<WithId>::probing();
        let doc = WithId {
            id: "a-1".to_string(),
            body: 7,
        };
        assert_eq!(extractor.extract(&doc).expect("id"), "a-1");
    }

    #[test]
    fn numeric_keys_convert_to_strings() {
        let extractor = IdExtractor::<WithUpperKey>::probing();
        assert_eq!(
            extractor.extract(&WithUpperKey { key: 42 }).expect("id"),
            "42"
        );
    }

    #[test]
    fn capitalized_id_outranks_lowercase() {
        let extractor = IdExtractor::<WithBoth>::probing();
        let doc = WithBoth {
            upper: "upper".to_string(),
            id: "lower".to_string(),
        };
        assert_eq!(extractor.extract(&doc).expect("id"), "upper");
    }

    #[test]
    fn keyless_types_report_extraction_unavailable() {
        let extractor = IdExtractor::<NoKey>::probing();
        let err = extractor.extract(&NoKey { body: 1 }).unwrap_err();
        assert!(matches!(err, AcornError::IdExtractionUnavailable { .. }));
    }

    #[test]
    fn non_object_payloads_report_extraction_unavailable() {
        let extractor = IdExtractor::<u32>::probing();
        let err = extractor.extract(&5_u32).unwrap_err();
        assert!(matches!(err, AcornError::IdExtractionUnavailable { .. }));
    }

    #[test]
    fn identified_capability_takes_priority_over_probing() {
        let extractor = IdExtractor::<Tagged>::identified();
        assert_eq!(extractor.extract(&Tagged { tag: 9 }).expect("id"), "tag-9");
    }

    #[test]
    fn custom_closure_is_used_verbatim() {
        let extractor = IdExtractor::<NoKey>::custom(|doc| Some(format!("body-{}", doc.body)));
        assert_eq!(
            extractor.extract(&NoKey { body: 3 }).expect("id"),
            "body-3"
        );
    }

    #[test]
    fn whitespace_ids_are_invalid() {
        let extractor = IdExtractor::<WithId>::probing();
        let doc = WithId {
            id: "   ".to_string(),
            body: 0,
        };
        assert!(matches!(
            extractor.extract(&doc).unwrap_err(),
            AcornError::InvalidId(_)
        ));

        let custom = IdExtractor::<NoKey>::custom(|_| Some(String::new()));
        assert!(matches!(
            custom.extract(&NoKey { body: 0 }).unwrap_err(),
            AcornError::InvalidId(_)
        ));
    }

    #[test]
    fn probe_result_is_cached_per_type() {
        let extractor = IdExtractor::<WithId>::probing();
        let doc = WithId {
            id: "x".to_string(),
            body: 0,
        };
        extractor.extract(&doc).expect("first probe");
        assert_eq!(
            probe_cache().get(&TypeId::of::<WithId>()).map(|e| *e),
            Some(Some("id"))
        );
    }
}
