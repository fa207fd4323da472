//! Summary artifact data model
//!
//! A [`SummaryArtifact`] is one stored generated summary tied to one
//! [`CacheKey`]. Artifacts are never deleted: invalidation flips
//! `is_valid`, regeneration replaces the row for the key.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::hash::ContentHash;
use crate::key::CacheKey;

/// Unique artifact identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Ulid);

impl ArtifactId {
    /// Generate new artifact ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Scope breadth of an artifact
///
/// Ordered: an artifact may only depend on artifacts of a strictly lower
/// level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    /// One source record
    Individual,
    /// A filtered set of records of one kind
    Group,
    /// Rollup over groups
    Global,
}

impl HierarchyLevel {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::Individual => "individual",
            HierarchyLevel::Group => "group",
            HierarchyLevel::Global => "global",
        }
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an artifact was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Raw source records
    RawData,
    /// Other, already generated artifacts
    ExistingSummaries,
}

/// Address of one raw source record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind (e.g. `ticket`)
    pub kind: String,
    /// Entity id within its kind
    pub id: String,
}

impl EntityRef {
    /// Create entity reference
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Optional, inclusive date range bounding a scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Create range
    #[inline]
    #[must_use]
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Unbounded on both sides
    #[inline]
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Whether bounds are ordered
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        }
    }

    /// Check if timestamp falls within the range
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Ids a summary was built from
///
/// `items` holds every raw record the scope covers (also for aggregates, so
/// containment lookups find them); `artifacts` holds consumed child
/// artifacts when built from existing summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIds {
    /// Raw records in scope
    #[serde(default)]
    pub items: BTreeSet<EntityRef>,
    /// Child artifacts consumed
    #[serde(default)]
    pub artifacts: BTreeSet<ArtifactId>,
    /// Date range the scope was resolved with
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl SourceIds {
    /// Source ids for a single record
    #[must_use]
    pub fn single(entity: EntityRef) -> Self {
        let mut items = BTreeSet::new();
        items.insert(entity);
        Self {
            items,
            ..Self::default()
        }
    }

    /// Check if a raw record is referenced
    #[inline]
    #[must_use]
    pub fn contains_item(&self, entity: &EntityRef) -> bool {
        self.items.contains(entity)
    }

    /// Check if a child artifact is referenced
    #[inline]
    #[must_use]
    pub fn contains_artifact(&self, id: &ArtifactId) -> bool {
        self.artifacts.contains(id)
    }
}

/// A generated summary ready to be stored
///
/// The store assigns the id and marks the stored row valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub key: CacheKey,
    pub content: String,
    pub template_key: String,
    pub source_type: SourceType,
    pub source_ids: SourceIds,
    pub metadata: serde_json::Value,
    pub hash_signature: ContentHash,
    pub generated_at: DateTime<Utc>,
}

/// A stored generated summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub id: ArtifactId,
    pub key: CacheKey,
    pub content: String,
    pub template_key: String,
    pub source_type: SourceType,
    pub source_ids: SourceIds,
    /// Derived counts used for quick staleness heuristics
    pub metadata: serde_json::Value,
    pub hash_signature: ContentHash,
    pub last_generated_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub is_valid: bool,
}

impl SummaryArtifact {
    /// Materialize a stored row from a draft
    #[must_use]
    pub fn from_new(id: ArtifactId, new: NewArtifact) -> Self {
        Self {
            id,
            key: new.key,
            content: new.content,
            template_key: new.template_key,
            source_type: new.source_type,
            source_ids: new.source_ids,
            metadata: new.metadata,
            hash_signature: new.hash_signature,
            last_generated_at: new.generated_at,
            last_verified_at: new.generated_at,
            is_valid: true,
        }
    }

    /// Summary type tag
    #[inline]
    #[must_use]
    pub fn summary_type(&self) -> &str {
        &self.key.summary_type
    }

    /// Hierarchy level
    #[inline]
    #[must_use]
    pub fn hierarchy_level(&self) -> HierarchyLevel {
        self.key.hierarchy_level
    }

    /// Whether the last verification is younger than `ttl`
    #[inline]
    #[must_use]
    pub fn verified_within(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_verified_at < ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hierarchy_levels_are_ordered() {
        assert!(HierarchyLevel::Individual < HierarchyLevel::Group);
        assert!(HierarchyLevel::Group < HierarchyLevel::Global);
    }

    #[test]
    fn artifact_id_display_and_parse() {
        let id = ArtifactId::new();
        let parsed: ArtifactId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn date_range_well_formed() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(DateRange::new(Some(a), Some(b)).is_well_formed());
        assert!(!DateRange::new(Some(b), Some(a)).is_well_formed());
        assert!(DateRange::new(None, Some(a)).is_well_formed());
        assert!(DateRange::default().is_unbounded());
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let range = DateRange::new(Some(a), Some(b));
        assert!(range.contains(a));
        assert!(range.contains(b));
        assert!(!range.contains(b + Duration::seconds(1)));
        assert!(DateRange::default().contains(a));
    }

    #[test]
    fn source_ids_containment() {
        let ids = SourceIds::single(EntityRef::new("item", "42"));
        assert!(ids.contains_item(&EntityRef::new("item", "42")));
        assert!(!ids.contains_item(&EntityRef::new("item", "43")));
        assert!(!ids.contains_item(&EntityRef::new("order", "42")));
    }
}
