//! In-memory summary store
//!
//! All rows, indexes and dependency edges live behind one
//! `parking_lot::RwLock`, which makes every trait operation a single atomic
//! unit. Used by tests, the CLI and as the reference backend.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use strata_artifact::{
    ArtifactId, CacheKey, ContentHash, EntityRef, NewArtifact, SourceType, SummaryArtifact,
};
use strata_graph::DependencyGraph;

use crate::error::StoreError;
use crate::snapshot::{StoreSnapshot, SNAPSHOT_VERSION};
use crate::store::{Invalidation, SummaryStore, UpsertReceipt};

/// Row and edge counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored rows, valid or not
    pub rows: usize,
    /// Rows with `is_valid = true`
    pub valid_rows: usize,
    /// Dependency edges
    pub edges: usize,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<ArtifactId, SummaryArtifact>,
    by_key: HashMap<CacheKey, ArtifactId>,
    /// Reverse index: raw record -> artifacts covering it
    by_item: HashMap<EntityRef, BTreeSet<ArtifactId>>,
    graph: DependencyGraph,
}

impl Table {
    fn unindex_items(&mut self, row: &SummaryArtifact) {
        for item in &row.source_ids.items {
            if let Some(ids) = self.by_item.get_mut(item) {
                ids.remove(&row.id);
                if ids.is_empty() {
                    self.by_item.remove(item);
                }
            }
        }
    }

    fn index_items(&mut self, row: &SummaryArtifact) {
        for item in &row.source_ids.items {
            self.by_item.entry(item.clone()).or_default().insert(row.id);
        }
    }

    fn flip(&mut self, ids: &BTreeSet<ArtifactId>) -> usize {
        let mut flipped = 0;
        for id in ids {
            if let Some(row) = self.rows.get_mut(id) {
                if row.is_valid {
                    row.is_valid = false;
                    flipped += 1;
                }
            }
        }
        flipped
    }
}

/// Summary store held in process memory
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    table: RwLock<Table>,
}

impl InMemorySummaryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current row and edge counts
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let table = self.table.read();
        StoreStats {
            rows: table.rows.len(),
            valid_rows: table.rows.values().filter(|r| r.is_valid).count(),
            edges: table.graph.edge_count(),
        }
    }

    /// Every stored row, sorted by id
    #[must_use]
    pub fn rows(&self) -> Vec<SummaryArtifact> {
        let table = self.table.read();
        let mut rows: Vec<SummaryArtifact> = table.rows.values().cloned().collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// Consistent copy of rows and edges
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let table = self.table.read();
        let mut artifacts: Vec<SummaryArtifact> = table.rows.values().cloned().collect();
        artifacts.sort_by_key(|r| r.id);
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            artifacts,
            edges: table.graph.edges(),
        }
    }

    /// Rebuild a store from a snapshot
    ///
    /// # Errors
    /// [`StoreError::Corrupt`] on version mismatch, duplicate ids or keys,
    /// or edges pointing at unknown rows; [`StoreError::Graph`] on cycles.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut table = Table::default();
        for row in snapshot.artifacts {
            if table.rows.contains_key(&row.id) {
                return Err(StoreError::Corrupt(format!("duplicate artifact id {}", row.id)));
            }
            if table.by_key.insert(row.key.clone(), row.id).is_some() {
                return Err(StoreError::Corrupt(format!("duplicate key {}", row.key)));
            }
            table.index_items(&row);
            table.graph.add_node(row.id);
            table.rows.insert(row.id, row);
        }

        for edge in snapshot.edges {
            for end in [edge.parent, edge.child] {
                if !table.rows.contains_key(&end) {
                    return Err(StoreError::Corrupt(format!("edge references unknown artifact {end}")));
                }
            }
            table.graph.add_edge(edge.parent, edge.child)?;
        }

        Ok(Self {
            table: RwLock::new(table),
        })
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn upsert(&self, artifact: NewArtifact) -> Result<UpsertReceipt, StoreError> {
        let mut table = self.table.write();
        let existing = table.by_key.get(&artifact.key).copied();
        let id = existing.unwrap_or_default();

        let children: BTreeSet<ArtifactId> = match artifact.source_type {
            SourceType::ExistingSummaries => artifact.source_ids.artifacts.clone(),
            SourceType::RawData => BTreeSet::new(),
        };
        if let Some(child) = children.iter().find(|c| !table.rows.contains_key(*c)) {
            return Err(StoreError::DanglingEdge { parent: id, child: *child });
        }
        // Edges first: a rejected edge set must leave the old row untouched.
        table.graph.replace_children(id, children.iter().copied())?;

        let mut row = SummaryArtifact::from_new(id, artifact);
        if let Some(previous) = existing.and_then(|prev| table.rows.get(&prev)) {
            // last_generated_at is strictly monotonic per key
            if row.last_generated_at <= previous.last_generated_at {
                row.last_generated_at = previous.last_generated_at + Duration::microseconds(1);
                row.last_verified_at = row.last_generated_at;
            }
        }

        if let Some(previous) = table.rows.remove(&id) {
            table.unindex_items(&previous);
        }
        table.index_items(&row);
        table.by_key.insert(row.key.clone(), id);
        tracing::debug!(
            artifact = %id,
            key = %row.key,
            replaced = existing.is_some(),
            children = children.len(),
            "stored summary artifact"
        );
        table.rows.insert(id, row);

        Ok(UpsertReceipt {
            id,
            replaced: existing.is_some(),
        })
    }

    async fn get_valid(&self, key: &CacheKey) -> Result<Option<SummaryArtifact>, StoreError> {
        let table = self.table.read();
        Ok(table
            .by_key
            .get(key)
            .and_then(|id| table.rows.get(id))
            .filter(|row| row.is_valid)
            .cloned())
    }

    async fn get(&self, id: ArtifactId) -> Result<Option<SummaryArtifact>, StoreError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn set_invalid(&self, ids: &BTreeSet<ArtifactId>) -> Result<usize, StoreError> {
        Ok(self.table.write().flip(ids))
    }

    async fn mark_verified(
        &self,
        id: ArtifactId,
        expected_hash: ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut table = self.table.write();
        match table.rows.get_mut(&id) {
            Some(row) if row.is_valid && row.hash_signature == expected_hash => {
                if at > row.last_verified_at {
                    row.last_verified_at = at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_ancestors(&self, id: ArtifactId) -> Result<BTreeSet<ArtifactId>, StoreError> {
        Ok(self.table.read().graph.ancestors(id)?)
    }

    async fn find_containing(&self, item: &EntityRef) -> Result<BTreeSet<ArtifactId>, StoreError> {
        Ok(self
            .table
            .read()
            .by_item
            .get(item)
            .cloned()
            .unwrap_or_default())
    }

    async fn invalidate_cascade(
        &self,
        roots: &BTreeSet<ArtifactId>,
    ) -> Result<Invalidation, StoreError> {
        let mut table = self.table.write();
        let ids: BTreeSet<ArtifactId> = table
            .graph
            .closure(roots.iter().copied())?
            .into_iter()
            .filter(|id| table.rows.contains_key(id))
            .collect();
        let flipped = table.flip(&ids);
        Ok(Invalidation { ids, flipped })
    }
}
