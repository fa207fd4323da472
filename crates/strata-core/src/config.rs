//! Engine configuration
//!
//! [`HierarchyConfig`] is the immutable `summary_type -> TypeConfig` table
//! the engine is constructed with. It is validated once, when built or
//! deserialized, so unknown types and malformed hierarchies fail at startup
//! rather than on the first request.
//!
//! # Example
//!
//! ```toml
//! generation_timeout_secs = 60
//!
//! [retry]
//! max_attempts = 3
//!
//! [hierarchy.types.ticket]
//! level = "individual"
//! entity = "ticket"
//! ttl_hours = 24
//!
//! [hierarchy.types.all_tickets]
//! level = "group"
//! depends_on = ["ticket"]
//! ttl_hours = 24
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration as StdDuration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use strata_artifact::{HierarchyLevel, KeyScope};

use crate::error::ConfigError;

/// Upper bound on `ttl_hours` (100 years)
pub const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

fn default_category() -> String {
    "other".to_string()
}

/// Per-type settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    pub level: HierarchyLevel,
    pub ttl_hours: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Record kind; individual types only
    #[serde(default)]
    pub entity: Option<String>,
    /// Template key; defaults to the type name
    #[serde(default)]
    pub template: Option<String>,
}

impl TypeConfig {
    /// Individual type summarizing one `entity` record
    #[must_use]
    pub fn individual(entity: impl Into<String>, ttl_hours: u64) -> Self {
        Self {
            level: HierarchyLevel::Individual,
            ttl_hours,
            depends_on: Vec::new(),
            category: default_category(),
            entity: Some(entity.into()),
            template: None,
        }
    }

    /// Group type over one individual type
    #[must_use]
    pub fn group(member_type: impl Into<String>, ttl_hours: u64) -> Self {
        Self {
            level: HierarchyLevel::Group,
            ttl_hours,
            depends_on: vec![member_type.into()],
            category: default_category(),
            entity: None,
            template: None,
        }
    }

    /// Global rollup over group types
    #[must_use]
    pub fn global<I, S>(parts: I, ttl_hours: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            level: HierarchyLevel::Global,
            ttl_hours,
            depends_on: parts.into_iter().map(Into::into).collect(),
            category: default_category(),
            entity: None,
            template: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Reverification interval
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        // bounded by MAX_TTL_HOURS at validation
        chrono::Duration::hours(i64::try_from(self.ttl_hours).unwrap_or(i64::MAX / 3_600_000))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHierarchy {
    types: BTreeMap<String, TypeConfig>,
}

/// Validated, immutable hierarchy table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHierarchy")]
pub struct HierarchyConfig {
    types: BTreeMap<String, TypeConfig>,
    #[serde(skip)]
    order: Vec<String>,
}

impl TryFrom<RawHierarchy> for HierarchyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawHierarchy) -> Result<Self, Self::Error> {
        Self::new(raw.types)
    }
}

impl HierarchyConfig {
    /// Validate and freeze a type table
    ///
    /// # Errors
    /// [`ConfigError`] describing the first violated rule.
    pub fn new(types: BTreeMap<String, TypeConfig>) -> Result<Self, ConfigError> {
        if types.is_empty() {
            return Err(ConfigError::Empty);
        }
        for (name, ty) in &types {
            validate_type(name, ty, &types)?;
        }
        let order = dependency_order(&types)?;
        Ok(Self { types, order })
    }

    #[must_use]
    pub fn builder() -> HierarchyConfigBuilder {
        HierarchyConfigBuilder::default()
    }

    /// Parse and validate a TOML `[types.*]` table
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let raw: RawHierarchy = toml::from_str(source)?;
        Self::try_from(raw)
    }

    #[must_use]
    pub fn get(&self, summary_type: &str) -> Option<&TypeConfig> {
        self.types.get(summary_type)
    }

    #[must_use]
    pub fn contains(&self, summary_type: &str) -> bool {
        self.types.contains_key(summary_type)
    }

    /// Key scope for a type
    #[must_use]
    pub fn scope(&self, summary_type: &str) -> Option<KeyScope> {
        self.get(summary_type).map(|ty| KeyScope {
            summary_type: summary_type.to_owned(),
            hierarchy_level: ty.level,
            category: ty.category.clone(),
        })
    }

    pub fn types(&self) -> impl Iterator<Item = (&str, &TypeConfig)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Type names with every dependency before its dependents
    #[must_use]
    pub fn dependency_order(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn validate_type(
    name: &str,
    ty: &TypeConfig,
    all: &BTreeMap<String, TypeConfig>,
) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidType {
        summary_type: name.to_owned(),
        reason: reason.to_owned(),
    };

    if name.trim().is_empty() {
        return Err(invalid("type name must not be empty"));
    }
    if ty.ttl_hours > MAX_TTL_HOURS {
        return Err(ConfigError::InvalidValue {
            field: "ttl_hours",
            reason: format!("{} exceeds {MAX_TTL_HOURS}", ty.ttl_hours),
        });
    }
    if ty.category.trim().is_empty() {
        return Err(invalid("category must not be empty"));
    }

    for dep in &ty.depends_on {
        let Some(target) = all.get(dep) else {
            return Err(ConfigError::UnknownDependency {
                summary_type: name.to_owned(),
                dependency: dep.clone(),
            });
        };
        if target.level >= ty.level {
            return Err(ConfigError::LevelOrder {
                summary_type: name.to_owned(),
                dependency: dep.clone(),
            });
        }
    }

    match ty.level {
        HierarchyLevel::Individual => {
            if !ty.depends_on.is_empty() {
                return Err(invalid("individual types have no dependencies"));
            }
            match ty.entity.as_deref() {
                Some(entity) if !entity.trim().is_empty() => {}
                _ => return Err(invalid("individual types need an entity")),
            }
        }
        HierarchyLevel::Group => {
            if ty.depends_on.len() != 1 {
                return Err(invalid("group types depend on exactly one individual type"));
            }
            if ty.entity.is_some() {
                return Err(invalid("group types take their entity from their member type"));
            }
        }
        HierarchyLevel::Global => {
            if ty.depends_on.is_empty() {
                return Err(invalid("global types depend on at least one group type"));
            }
            if ty
                .depends_on
                .iter()
                .any(|dep| all.get(dep).map(|t| t.level) != Some(HierarchyLevel::Group))
            {
                return Err(invalid("global types depend on group types only"));
            }
            if ty.entity.is_some() {
                return Err(invalid("global types have no entity"));
            }
        }
    }
    Ok(())
}

/// Topological order of the dependency relation
fn dependency_order(types: &BTreeMap<String, TypeConfig>) -> Result<Vec<String>, ConfigError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (name, ty) in types {
        graph.add_node(name.as_str());
        for dep in &ty.depends_on {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }
    toposort(&graph, None)
        .map(|order| order.into_iter().map(str::to_owned).collect())
        .map_err(|cycle| ConfigError::Cycle(cycle.node_id().to_owned()))
}

/// Incremental [`HierarchyConfig`] construction
#[derive(Debug, Default, Clone)]
pub struct HierarchyConfigBuilder {
    types: BTreeMap<String, TypeConfig>,
}

impl HierarchyConfigBuilder {
    #[must_use]
    pub fn with_type(mut self, name: impl Into<String>, ty: TypeConfig) -> Self {
        self.types.insert(name.into(), ty);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// See [`HierarchyConfig::new`].
    pub fn build(self) -> Result<HierarchyConfig, ConfigError> {
        HierarchyConfig::new(self.types)
    }
}

/// Bounded retry with exponential backoff for generator calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> StdDuration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = scaled.min(self.max_backoff_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        StdDuration::from_millis(capped as u64)
    }

    /// # Errors
    /// [`ConfigError::InvalidValue`] for out-of-range fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be > 0".to_string(),
            });
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier",
                reason: "must be a finite value >= 1.0".to_string(),
            });
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff_ms",
                reason: "must not exceed max_backoff_ms".to_string(),
            });
        }
        Ok(())
    }
}

fn default_generation_timeout() -> u64 {
    60
}

/// Everything the orchestrator is constructed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt bound on a generator call
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
    /// Share one generation between concurrent misses for a key
    #[serde(default)]
    pub single_flight: bool,
}

impl EngineConfig {
    /// Config with default retry and timeout settings
    #[must_use]
    pub fn new(hierarchy: HierarchyConfig) -> Self {
        Self {
            hierarchy,
            retry: RetryPolicy::default(),
            generation_timeout_secs: default_generation_timeout(),
            single_flight: false,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_generation_timeout(mut self, secs: u64) -> Self {
        self.generation_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn generation_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.generation_timeout_secs)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Read, parse or validation failure.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// # Errors
    /// [`ConfigError::InvalidValue`] for out-of-range fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation_timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support_desk() -> HierarchyConfig {
        HierarchyConfig::builder()
            .with_type("ticket", TypeConfig::individual("ticket", 24).with_category("zendesk"))
            .with_type("issue", TypeConfig::individual("issue", 24).with_category("jira"))
            .with_type("all_tickets", TypeConfig::group("ticket", 24).with_category("zendesk"))
            .with_type("all_issues", TypeConfig::group("issue", 24).with_category("jira"))
            .with_type(
                "system_wide",
                TypeConfig::global(["all_tickets", "all_issues"], 48).with_category("system"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn dependency_order_puts_dependencies_first() {
        let config = support_desk();
        let order = config.dependency_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("ticket") < pos("all_tickets"));
        assert!(pos("all_tickets") < pos("system_wide"));
        assert!(pos("all_issues") < pos("system_wide"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = HierarchyConfig::builder()
            .with_type("all_tickets", TypeConfig::group("ticket", 24))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
    }

    #[test]
    fn same_level_dependency_is_rejected() {
        let err = HierarchyConfig::builder()
            .with_type("ticket", TypeConfig::individual("ticket", 24))
            .with_type("a", TypeConfig::group("ticket", 24))
            .with_type("b", TypeConfig {
                depends_on: vec!["a".into()],
                ..TypeConfig::group("ticket", 24)
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::LevelOrder { .. }));
    }

    #[test]
    fn individual_without_entity_is_rejected() {
        let mut ty = TypeConfig::individual("ticket", 24);
        ty.entity = None;
        let err = HierarchyConfig::builder().with_type("ticket", ty).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
    }

    #[test]
    fn global_over_individual_is_rejected() {
        let err = HierarchyConfig::builder()
            .with_type("ticket", TypeConfig::individual("ticket", 24))
            .with_type("everything", TypeConfig::global(["ticket"], 24))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
    }

    #[test]
    fn empty_hierarchy_is_rejected() {
        assert!(matches!(
            HierarchyConfig::builder().build(),
            Err(ConfigError::Empty)
        ));
    }

    #[test]
    fn engine_config_parses_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            single_flight = true

            [retry]
            max_attempts = 5

            [hierarchy.types.ticket]
            level = "individual"
            entity = "ticket"
            ttl_hours = 24
            category = "zendesk"

            [hierarchy.types.all_tickets]
            level = "group"
            depends_on = ["ticket"]
            ttl_hours = 12
            "#,
        )
        .unwrap();

        assert!(config.single_flight);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.generation_timeout_secs, 60);
        let group = config.hierarchy.get("all_tickets").unwrap();
        assert_eq!(group.category, "other");
        assert_eq!(group.ttl(), chrono::Duration::hours(12));
        assert_eq!(config.hierarchy.dependency_order().len(), 2);
    }

    #[test]
    fn invalid_hierarchy_fails_toml_parse() {
        let err = EngineConfig::from_toml_str(
            r#"
            [hierarchy.types.all_tickets]
            level = "group"
            depends_on = ["ticket"]
            ttl_hours = 12
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 250,
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff(1), StdDuration::from_millis(100));
        assert_eq!(policy.backoff(2), StdDuration::from_millis(200));
        assert_eq!(policy.backoff(3), StdDuration::from_millis(250));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn bundled_support_desk_config_loads() {
        let config = EngineConfig::from_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../config/hierarchy.toml"
        ))
        .unwrap();
        assert_eq!(config.hierarchy.len(), 7);
        let order = config.hierarchy.dependency_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("zendesk_ticket") < pos("all_tickets"));
        assert!(pos("all_accounts") < pos("system_wide"));
        assert_eq!(config.hierarchy.get("salesforce_account").unwrap().ttl_hours, 48);
        assert_eq!(config.hierarchy.scope("system_wide").unwrap().category, "system");
    }

    #[test]
    fn from_path_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = EngineConfig::from_path(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "generation_timeout_secs = \"soon\"").unwrap();
        let malformed = EngineConfig::from_path(&path).unwrap_err();
        assert!(matches!(malformed, ConfigError::Parse(_)));
    }
}
