//! # Strata Core
//!
//! Hierarchical summary engine: decides whether a previously generated
//! summary is still usable, regenerates it when not, and propagates
//! invalidation through the individual -> group -> global hierarchy.
//!
//! # Components
//!
//! - [`SummaryOrchestrator`]: get-or-generate workflow, invalidation entry points
//! - [`ValidityChecker`]: Valid / Invalid / Unknown decisions with lazy TTL reverification
//! - [`SourceDataFetcher`]: scope resolution and order-independent content hashing
//! - [`HierarchyConfig`]: immutable `summary_type -> {level, ttl, depends_on}` table
//! - [`TextGenerator`]: external generator contract, retried with backoff
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::{EngineConfig, SummaryOrchestrator, SummaryRequest};
//!
//! let config = EngineConfig::from_path("config/hierarchy.toml")?;
//! let engine = SummaryOrchestrator::builder(config)
//!     .store(store)
//!     .records(records)
//!     .generator(generator)
//!     .build()?;
//!
//! let outcome = engine
//!     .get_or_generate(SummaryRequest::item("zendesk_ticket", "42"))
//!     .await?;
//! println!("cached: {}", outcome.cached);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod generator;
pub mod orchestrator;
pub mod source;
pub mod stats;
pub mod strategy;
pub mod types;
pub mod validity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, HierarchyConfig, HierarchyConfigBuilder, RetryPolicy, TypeConfig};
pub use error::{ConfigError, GeneratorError, SourceError, SummaryError};
pub use fetcher::{hash_children, hash_records, ResolvedSource, SourceDataFetcher, SourcePlan};
pub use generator::{generate_with_retry, TemplateRegistry, TextGenerator, AGGREGATE_SUFFIX};
pub use orchestrator::{CheckReport, SummaryOrchestrator, SummaryOrchestratorBuilder};
pub use source::{MemoryRecordSource, Record, RecordFilter, RecordSource};
pub use stats::{EngineStats, StatsSnapshot};
pub use strategy::{SourceStrategy, StrategyTable};
pub use types::{Stage, SummaryOutcome, SummaryRequest, Validity};
pub use validity::{assess, Assessment, Check, ValidityChecker};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the summary engine
    pub use crate::{
        EngineConfig, HierarchyConfig, MemoryRecordSource, Record, RecordSource, SummaryError,
        SummaryOrchestrator, SummaryOutcome, SummaryRequest, TextGenerator, TypeConfig,
    };
    pub use strata_artifact::{DateRange, EntityRef, QueryParams, SourceMode};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
