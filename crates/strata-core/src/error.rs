//! Error types for the summary engine
//!
//! [`SummaryError`] is the only error surfaced to callers. Collaborator
//! errors ([`SourceError`], [`GeneratorError`], [`StoreError`], key and
//! config errors) convert into it by category:
//! - missing records or artifacts become `NotFound`
//! - malformed requests and unknown summary types become `Validation`
//! - store and network hiccups become `TransientIo`
//! - generator failures after the retry budget become `Generation`
//!
//! Hash mismatches are never errors; they surface as invalid validity.

use strata_artifact::{EntityRef, KeyError};
use strata_store::StoreError;

/// Surfaced engine error
///
/// Payloads are strings so a single failure can be shared by every waiter
/// of a deduplicated generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    /// Missing source record or artifact
    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown summary type or malformed parameters; raised before any I/O
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store or network hiccup; safe to retry
    #[error("transient io error: {0}")]
    TransientIo(String),

    /// Generator failed after exhausting its retry policy
    #[error("generation failed after {attempts} attempt(s): {reason}")]
    Generation { attempts: u32, reason: String },
}

impl SummaryError {
    /// Check if the caller may retry the request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Unknown summary type
    #[inline]
    pub fn unknown_type(summary_type: &str) -> Self {
        Self::Validation(format!("unknown summary type '{summary_type}'"))
    }
}

impl From<KeyError> for SummaryError {
    fn from(err: KeyError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for SummaryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DanglingEdge { .. } => Self::NotFound(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Io(_) => Self::TransientIo(err.to_string()),
            // Graph, snapshot or encoding faults are not recoverable by retrying
            StoreError::Graph(_) | StoreError::Corrupt(_) | StoreError::Serialization(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}

impl From<SourceError> for SummaryError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => Self::NotFound(err.to_string()),
            SourceError::Unavailable(_) => Self::TransientIo(err.to_string()),
        }
    }
}

/// Record source errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Required record does not exist
    #[error("record {0} does not exist")]
    NotFound(EntityRef),

    /// Source backend unreachable
    #[error("record source unavailable: {0}")]
    Unavailable(String),
}

/// Text generator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    /// Generator rejected or failed the call
    #[error("generator failed: {0}")]
    Failed(String),

    /// Call exceeded its time bound
    #[error("generator timed out after {0}s")]
    Timeout(u64),

    /// Backing service unreachable
    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Hierarchy has no types
    #[error("hierarchy defines no summary types")]
    Empty,

    /// Dependency names a type that is not configured
    #[error("'{summary_type}' depends on unknown type '{dependency}'")]
    UnknownDependency {
        summary_type: String,
        dependency: String,
    },

    /// Dependency is not at a strictly lower level
    #[error("'{summary_type}' may not depend on '{dependency}' at the same or a higher level")]
    LevelOrder {
        summary_type: String,
        dependency: String,
    },

    /// Type shape does not match its level
    #[error("invalid '{summary_type}': {reason}")]
    InvalidType {
        summary_type: String,
        reason: String,
    },

    /// Dependency relation is cyclic
    #[error("dependency cycle through '{0}'")]
    Cycle(String),

    /// Scalar out of range
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<ConfigError> for SummaryError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}
