//! Request, outcome and state types for the summary workflow

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_artifact::{QueryParams, SummaryArtifact};

/// One get-or-generate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub summary_type: String,
    #[serde(default)]
    pub params: QueryParams,
    /// Skip the cache lookup; never part of the key
    #[serde(default)]
    pub force_regenerate: bool,
}

impl SummaryRequest {
    #[must_use]
    pub fn new(summary_type: impl Into<String>, params: QueryParams) -> Self {
        Self {
            summary_type: summary_type.into(),
            params,
            force_regenerate: false,
        }
    }

    /// Request for one record's individual summary
    #[must_use]
    pub fn item(summary_type: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self::new(summary_type, QueryParams::item(item_id))
    }

    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force_regenerate = true;
        self
    }
}

/// Result of a successful request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub artifact: SummaryArtifact,
    /// True when served from the store without generating
    pub cached: bool,
}

/// Workflow stages of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CheckCache,
    Fetch,
    Generate,
    Store,
    CascadeInvalidate,
    Done,
    Failed,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CheckCache => "check_cache",
            Stage::Fetch => "fetch",
            Stage::Generate => "generate",
            Stage::Store => "store",
            Stage::CascadeInvalidate => "cascade_invalidate",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict on an existing artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Servable; `reverified` when the source hash was recomputed
    Valid { reverified: bool },
    /// Stale or explicitly invalidated
    Invalid,
    /// Source content could not be resolved
    Unknown(String),
}

impl Validity {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}
