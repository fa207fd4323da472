//! Source strategies keyed by summary type
//!
//! Every configured summary type maps to exactly one [`SourceStrategy`]
//! describing where its content comes from. The table is checked against
//! the hierarchy when the engine is built; a type without a matching
//! strategy is a startup error, never a silent fallback.

use std::collections::BTreeMap;

use strata_artifact::HierarchyLevel;

use crate::config::HierarchyConfig;
use crate::error::{ConfigError, SummaryError};

/// Where a summary type's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStrategy {
    /// One record of `entity`, addressed by `item_id`
    SingleRecord { entity: String },
    /// Filtered records of `entity`; in summaries mode, the
    /// `member_type` summary of each record
    Collection { entity: String, member_type: String },
    /// Existing summaries of each group type in `parts`
    Rollup { parts: Vec<String> },
}

impl SourceStrategy {
    /// Level this strategy can serve
    #[must_use]
    pub fn level(&self) -> HierarchyLevel {
        match self {
            Self::SingleRecord { .. } => HierarchyLevel::Individual,
            Self::Collection { .. } => HierarchyLevel::Group,
            Self::Rollup { .. } => HierarchyLevel::Global,
        }
    }
}

/// Registered strategies, one per summary type
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    strategies: BTreeMap<String, SourceStrategy>,
}

impl StrategyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the standard strategy for every configured type
    ///
    /// # Errors
    /// Fails if a group's member type has no entity.
    pub fn from_hierarchy(hierarchy: &HierarchyConfig) -> Result<Self, ConfigError> {
        let mut table = Self::new();
        for (name, ty) in hierarchy.types() {
            let strategy = match ty.level {
                HierarchyLevel::Individual => SourceStrategy::SingleRecord {
                    entity: ty.entity.clone().unwrap_or_default(),
                },
                HierarchyLevel::Group => {
                    let member_type = ty.depends_on.first().cloned().unwrap_or_default();
                    let entity = hierarchy
                        .get(&member_type)
                        .and_then(|member| member.entity.clone())
                        .ok_or_else(|| ConfigError::InvalidType {
                            summary_type: name.to_owned(),
                            reason: format!("member type '{member_type}' has no entity"),
                        })?;
                    SourceStrategy::Collection {
                        entity,
                        member_type,
                    }
                }
                HierarchyLevel::Global => SourceStrategy::Rollup {
                    parts: ty.depends_on.clone(),
                },
            };
            table.strategies.insert(name.to_owned(), strategy);
        }
        Ok(table)
    }

    /// Register or replace the strategy for a type
    #[must_use]
    pub fn with(mut self, summary_type: impl Into<String>, strategy: SourceStrategy) -> Self {
        self.strategies.insert(summary_type.into(), strategy);
        self
    }

    /// Check the table covers the hierarchy exactly
    ///
    /// # Errors
    /// [`ConfigError::InvalidType`] for missing, extra or mismatched entries.
    pub fn validate(&self, hierarchy: &HierarchyConfig) -> Result<(), ConfigError> {
        let invalid = |name: &str, reason: String| ConfigError::InvalidType {
            summary_type: name.to_owned(),
            reason,
        };

        for (name, ty) in hierarchy.types() {
            let Some(strategy) = self.strategies.get(name) else {
                return Err(invalid(name, "no source strategy registered".into()));
            };
            if strategy.level() != ty.level {
                return Err(invalid(
                    name,
                    format!("{} strategy registered for a {} type", strategy.level(), ty.level),
                ));
            }
            let referenced: Vec<&str> = match strategy {
                SourceStrategy::SingleRecord { .. } => Vec::new(),
                SourceStrategy::Collection { member_type, .. } => vec![member_type.as_str()],
                SourceStrategy::Rollup { parts } => parts.iter().map(String::as_str).collect(),
            };
            for dep in referenced {
                if !ty.depends_on.iter().any(|d| d == dep) {
                    return Err(invalid(name, format!("strategy uses undeclared dependency '{dep}'")));
                }
            }
        }

        if let Some(extra) = self.strategies.keys().find(|name| !hierarchy.contains(name)) {
            return Err(invalid(extra, "strategy registered for an unconfigured type".into()));
        }
        Ok(())
    }

    /// Strategy for a type
    ///
    /// # Errors
    /// [`SummaryError::Validation`] for unknown types.
    pub fn get(&self, summary_type: &str) -> Result<&SourceStrategy, SummaryError> {
        self.strategies
            .get(summary_type)
            .ok_or_else(|| SummaryError::unknown_type(summary_type))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
