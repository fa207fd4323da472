//! Storage contract for summary artifacts

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_artifact::{ArtifactId, CacheKey, ContentHash, EntityRef, NewArtifact, SummaryArtifact};

use crate::error::StoreError;

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertReceipt {
    /// Id of the row now holding the key
    pub id: ArtifactId,
    /// Whether a prior row for the key was replaced
    pub replaced: bool,
}

/// Result of a cascade invalidation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Every stored artifact in the invalidated closure
    pub ids: BTreeSet<ArtifactId>,
    /// How many of them were valid before the call
    pub flipped: usize,
}

/// Persistent keyed map of summary artifacts
///
/// # Contract
/// - At most one row per [`CacheKey`]; at most one valid artifact per key.
/// - `upsert` replaces the whole row for its key atomically and marks it
///   valid. When the artifact was built from existing summaries, its
///   dependency edges are replaced in the same atomic step.
/// - `set_invalid` and `invalidate_cascade` flip their whole id set as one
///   unit; readers never observe a partially invalidated chain.
/// - Rows are never deleted.
#[async_trait]
pub trait SummaryStore: Send + Sync + Debug {
    /// Insert or replace the row for `artifact.key`
    async fn upsert(&self, artifact: NewArtifact) -> Result<UpsertReceipt, StoreError>;

    /// Current valid artifact for a key
    async fn get_valid(&self, key: &CacheKey) -> Result<Option<SummaryArtifact>, StoreError>;

    /// Artifact by id, valid or not
    async fn get(&self, id: ArtifactId) -> Result<Option<SummaryArtifact>, StoreError>;

    /// Mark a batch invalid; returns how many were valid before
    async fn set_invalid(&self, ids: &BTreeSet<ArtifactId>) -> Result<usize, StoreError>;

    /// Advance `last_verified_at` if the row still carries `expected_hash`
    ///
    /// Returns false when the row is gone, invalid or was replaced.
    async fn mark_verified(
        &self,
        id: ArtifactId,
        expected_hash: ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Transitive parents of an artifact, excluding itself
    async fn find_ancestors(&self, id: ArtifactId) -> Result<BTreeSet<ArtifactId>, StoreError>;

    /// Artifacts whose source ids contain the record
    async fn find_containing(&self, item: &EntityRef) -> Result<BTreeSet<ArtifactId>, StoreError>;

    /// Invalidate the roots and every ancestor of them
    ///
    /// The default computes the closure with `find_ancestors` and flips it
    /// with one `set_invalid` batch. Backends that can do both under one
    /// transaction should override it.
    async fn invalidate_cascade(
        &self,
        roots: &BTreeSet<ArtifactId>,
    ) -> Result<Invalidation, StoreError> {
        let mut ids = BTreeSet::new();
        for root in roots {
            if ids.contains(root) {
                continue;
            }
            let ancestors = self.find_ancestors(*root).await?;
            ids.insert(*root);
            ids.extend(ancestors);
        }
        let flipped = self.set_invalid(&ids).await?;
        Ok(Invalidation { ids, flipped })
    }
}
