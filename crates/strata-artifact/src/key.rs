//! Cache key normalization
//!
//! [`KeyResolver`] turns `(summary_type, hierarchy_level, date_range,
//! query_params)` into a canonical [`CacheKey`]: id lists are sorted and
//! deduplicated, absent optional fields become explicit nulls and nested
//! structures are serialized with sorted keys, so two logically identical
//! requests always share one key.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::artifact::{DateRange, HierarchyLevel};
use crate::canonical::canonical_string;
use crate::hash::ContentHash;

/// How a group scope is materialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Summarize raw records directly
    #[default]
    Raw,
    /// Aggregate existing child summaries
    Summaries,
}

impl SourceMode {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Raw => "raw",
            SourceMode::Summaries => "summaries",
        }
    }
}

/// Request parameters scoping a summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Record id for individual summaries
    #[serde(default)]
    pub item_id: Option<String>,
    /// Date range for group and global summaries
    #[serde(default)]
    pub date_range: DateRange,
    /// Restrict the scope to these record ids
    #[serde(default)]
    pub include_ids: Vec<String>,
    /// Remove these record ids from the scope
    #[serde(default)]
    pub exclude_ids: Vec<String>,
    /// Raw records or existing summaries (groups only)
    #[serde(default)]
    pub source_mode: SourceMode,
    /// Free-form additional parameters
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl QueryParams {
    /// Empty parameters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for one record
    #[inline]
    #[must_use]
    pub fn item(id: impl Into<String>) -> Self {
        Self {
            item_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// With date range
    #[inline]
    #[must_use]
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = range;
        self
    }

    /// With included ids
    #[must_use]
    pub fn include<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// With excluded ids
    #[must_use]
    pub fn exclude<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// With source mode
    #[inline]
    #[must_use]
    pub fn with_source_mode(mut self, mode: SourceMode) -> Self {
        self.source_mode = mode;
        self
    }

    /// With extra parameter
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Canonical identity of one cached summary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub summary_type: String,
    pub hierarchy_level: HierarchyLevel,
    pub category: String,
    pub date_range_start: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
    /// Normalized query parameters, canonical JSON
    pub params: String,
}

impl CacheKey {
    /// Digest over every identity field
    #[must_use]
    pub fn digest(&self) -> ContentHash {
        ContentHash::compute(self.canonical().as_bytes())
    }

    /// Canonical single-string form
    #[must_use]
    pub fn canonical(&self) -> String {
        canonical_string(&json!({
            "summary_type": self.summary_type,
            "hierarchy_level": self.hierarchy_level.as_str(),
            "category": self.category,
            "date_range_start": self.date_range_start.map(format_ts),
            "date_range_end": self.date_range_end.map(format_ts),
            "params": self.params,
        }))
    }

    /// Date range carried by the key
    #[inline]
    #[must_use]
    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.date_range_start, self.date_range_end)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.summary_type, self.digest().short())
    }
}

/// Static description of a summary type needed to build its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScope {
    pub summary_type: String,
    pub hierarchy_level: HierarchyLevel,
    pub category: String,
}

/// Rejected request parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Individual summaries need the record id
    #[error("summary type '{0}' requires an item_id")]
    MissingItemId(String),

    /// Only individual summaries address one record
    #[error("summary type '{0}' does not accept an item_id")]
    UnexpectedItemId(String),

    /// Empty id in a list or as item id
    #[error("empty id in {0}")]
    EmptyId(&'static str),

    /// Start after end
    #[error("date range start is after end")]
    InvertedDateRange,

    /// Same id included and excluded
    #[error("id '{0}' is both included and excluded")]
    ConflictingFilter(String),
}

/// Normalizes request parameters into canonical cache keys
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver;

impl KeyResolver {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate and normalize parameters for a scope
    ///
    /// # Errors
    /// Returns [`KeyError`] for malformed parameters; no I/O is involved.
    pub fn normalize(&self, scope: &KeyScope, params: &QueryParams) -> Result<QueryParams, KeyError> {
        let item_id = match (scope.hierarchy_level, params.item_id.as_deref()) {
            (HierarchyLevel::Individual, None) => {
                return Err(KeyError::MissingItemId(scope.summary_type.clone()))
            }
            (HierarchyLevel::Individual, Some(id)) => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(KeyError::EmptyId("item_id"));
                }
                Some(id.to_owned())
            }
            (_, Some(_)) => return Err(KeyError::UnexpectedItemId(scope.summary_type.clone())),
            (_, None) => None,
        };

        if !params.date_range.is_well_formed() {
            return Err(KeyError::InvertedDateRange);
        }

        let include_ids = normalize_ids(&params.include_ids, "include_ids")?;
        let exclude_ids = normalize_ids(&params.exclude_ids, "exclude_ids")?;
        if let Some(conflict) = include_ids.iter().find(|id| exclude_ids.binary_search(id).is_ok()) {
            return Err(KeyError::ConflictingFilter(conflict.clone()));
        }

        let source_mode = match scope.hierarchy_level {
            HierarchyLevel::Individual => SourceMode::Raw,
            HierarchyLevel::Group => params.source_mode,
            HierarchyLevel::Global => SourceMode::Summaries,
        };

        let extra = params
            .extra
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), normalize_extra(v)))
            .collect();

        Ok(QueryParams {
            item_id,
            date_range: params.date_range,
            include_ids,
            exclude_ids,
            source_mode,
            extra,
        })
    }

    /// Resolve the canonical key for a request
    ///
    /// # Errors
    /// Returns [`KeyError`] for malformed parameters.
    pub fn resolve(&self, scope: &KeyScope, params: &QueryParams) -> Result<CacheKey, KeyError> {
        let normalized = self.normalize(scope, params)?;
        Ok(CacheKey {
            summary_type: scope.summary_type.clone(),
            hierarchy_level: scope.hierarchy_level,
            category: scope.category.clone(),
            date_range_start: normalized.date_range.start,
            date_range_end: normalized.date_range.end,
            params: canonical_params(&normalized),
        })
    }
}

/// Canonical JSON of normalized parameters; absent fields are explicit nulls
fn canonical_params(params: &QueryParams) -> String {
    let extra: serde_json::Map<String, Value> = params
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    canonical_string(&json!({
        "item_id": params.item_id,
        "date_range": {
            "start": params.date_range.start.map(format_ts),
            "end": params.date_range.end.map(format_ts),
        },
        "include_ids": params.include_ids,
        "exclude_ids": params.exclude_ids,
        "source_mode": params.source_mode.as_str(),
        "extra": Value::Object(extra),
    }))
}

fn normalize_ids(ids: &[String], field: &'static str) -> Result<Vec<String>, KeyError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            return Err(KeyError::EmptyId(field));
        }
        out.push(id.to_owned());
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Sort scalar lists so their order does not split the cache
fn normalize_extra(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.iter().all(is_scalar) => {
            let mut items = items.clone();
            items.sort_by_cached_key(canonical_string);
            Value::Array(items)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_extra).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize_extra(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn group_scope() -> KeyScope {
        KeyScope {
            summary_type: "all_items".into(),
            hierarchy_level: HierarchyLevel::Group,
            category: "items".into(),
        }
    }

    fn item_scope() -> KeyScope {
        KeyScope {
            summary_type: "item".into(),
            hierarchy_level: HierarchyLevel::Individual,
            category: "items".into(),
        }
    }

    #[test]
    fn id_lists_are_sorted_and_deduplicated() {
        let resolver = KeyResolver::new();
        let a = resolver
            .resolve(&group_scope(), &QueryParams::new().include(["3", "1", "2", "1"]))
            .unwrap();
        let b = resolver
            .resolve(&group_scope(), &QueryParams::new().include(["1", "2", "3"]))
            .unwrap();
        assert_eq!(a, b);
        assert!(a.params.contains(r#""include_ids":["1","2","3"]"#));
    }

    #[test]
    fn absent_fields_are_explicit_nulls() {
        let key = KeyResolver::new()
            .resolve(&group_scope(), &QueryParams::new())
            .unwrap();
        assert_eq!(
            key.params,
            r#"{"date_range":{"end":null,"start":null},"exclude_ids":[],"extra":{},"include_ids":[],"item_id":null,"source_mode":"raw"}"#
        );
    }

    #[test]
    fn null_extra_equals_absent_extra() {
        let resolver = KeyResolver::new();
        let a = resolver
            .resolve(&group_scope(), &QueryParams::new().with_extra("region", Value::Null))
            .unwrap();
        let b = resolver.resolve(&group_scope(), &QueryParams::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_extra_is_order_insensitive() {
        let resolver = KeyResolver::new();
        let a = resolver
            .resolve(
                &group_scope(),
                &QueryParams::new().with_extra("filter", json!({"tags": ["b", "a"], "owner": "x"})),
            )
            .unwrap();
        let b = resolver
            .resolve(
                &group_scope(),
                &QueryParams::new().with_extra("filter", json!({"owner": "x", "tags": ["a", "b"]})),
            )
            .unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn individual_requires_item_id() {
        let err = KeyResolver::new()
            .resolve(&item_scope(), &QueryParams::new())
            .unwrap_err();
        assert_eq!(err, KeyError::MissingItemId("item".into()));
    }

    #[test]
    fn group_rejects_item_id() {
        let err = KeyResolver::new()
            .resolve(&group_scope(), &QueryParams::item("1"))
            .unwrap_err();
        assert!(matches!(err, KeyError::UnexpectedItemId(_)));
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let err = KeyResolver::new()
            .resolve(
                &group_scope(),
                &QueryParams::new().with_date_range(DateRange::new(Some(b), Some(a))),
            )
            .unwrap_err();
        assert_eq!(err, KeyError::InvertedDateRange);
    }

    #[test]
    fn include_exclude_conflict_is_rejected() {
        let err = KeyResolver::new()
            .resolve(&group_scope(), &QueryParams::new().include(["1"]).exclude(["1"]))
            .unwrap_err();
        assert_eq!(err, KeyError::ConflictingFilter("1".into()));
    }

    #[test]
    fn source_mode_is_pinned_outside_groups() {
        let resolver = KeyResolver::new();
        let a = resolver
            .resolve(
                &item_scope(),
                &QueryParams::item("7").with_source_mode(SourceMode::Summaries),
            )
            .unwrap();
        let b = resolver.resolve(&item_scope(), &QueryParams::item("7")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn date_range_is_part_of_identity() {
        let resolver = KeyResolver::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = resolver
            .resolve(
                &group_scope(),
                &QueryParams::new().with_date_range(DateRange::new(Some(start), None)),
            )
            .unwrap();
        let b = resolver.resolve(&group_scope(), &QueryParams::new()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.date_range_start, Some(start));
    }

    proptest! {
        #[test]
        fn prop_include_order_never_changes_key(
            ids in proptest::collection::vec("[0-9]{1,4}", 0..12)
        ) {
            let resolver = KeyResolver::new();
            let mut reversed = ids.clone();
            reversed.reverse();
            let a = resolver.resolve(&group_scope(), &QueryParams::new().include(ids)).unwrap();
            let b = resolver.resolve(&group_scope(), &QueryParams::new().include(reversed)).unwrap();
            prop_assert_eq!(a.digest(), b.digest());
        }
    }
}
