//! Error types for summary storage

use strata_artifact::ArtifactId;
use strata_graph::GraphError;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend temporarily unreachable; safe to retry
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Edge references an artifact the store does not hold
    #[error("artifact {parent} references unknown child {child}")]
    DanglingEdge { parent: ArtifactId, child: ArtifactId },

    /// Dependency graph rejected an edge
    #[error("dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Snapshot content violates store invariants
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// Filesystem error reading or writing a snapshot
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if the operation may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}
