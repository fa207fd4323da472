//! Point-in-time export of a store

use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_artifact::SummaryArtifact;
use strata_graph::DependencyEdge;

use crate::error::StoreError;
use crate::memory::InMemorySummaryStore;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable copy of every row and edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub artifacts: Vec<SummaryArtifact>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl StoreSnapshot {
    /// Write as pretty JSON
    ///
    /// # Errors
    /// Serialization or filesystem failures.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path.as_ref(), bytes).await?;
        tracing::info!(
            path = %path.as_ref().display(),
            artifacts = self.artifacts.len(),
            edges = self.edges.len(),
            "wrote store snapshot"
        );
        Ok(())
    }

    /// Read a snapshot file
    ///
    /// # Errors
    /// Filesystem or decoding failures.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl InMemorySummaryStore {
    /// Load a snapshot file into a fresh store
    ///
    /// # Errors
    /// See [`StoreSnapshot::load_from`] and [`InMemorySummaryStore::from_snapshot`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let snapshot = StoreSnapshot::load_from(path).await?;
        Self::from_snapshot(snapshot)
    }
}
