use strata_artifact::ArtifactId;

/// Dependency graph errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An artifact cannot aggregate itself
    #[error("artifact {0} cannot depend on itself")]
    SelfLoop(ArtifactId),

    /// Adding the edge would close a cycle
    #[error("edge {parent} -> {child} would create a cycle")]
    CycleDetected { parent: ArtifactId, child: ArtifactId },

    /// A traversal came back to its own root
    #[error("dependency cycle reachable from {0}")]
    CycleReachable(ArtifactId),
}
