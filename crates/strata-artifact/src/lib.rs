//! Strata Artifact Model
//!
//! Data model and identity for cached summaries.
//!
//! # Core Concepts
//!
//! - [`SummaryArtifact`]: one stored generated summary for one [`CacheKey`]
//! - [`ContentHash`]: 32-byte Blake3 digest of resolved source content
//! - [`SetDigest`]: order-independent digest over keyed entries
//! - [`KeyResolver`]: canonical key normalization of request parameters
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_artifact::{HierarchyLevel, KeyResolver, KeyScope, QueryParams};
//!
//! let scope = KeyScope {
//!     summary_type: "all_items".into(),
//!     hierarchy_level: HierarchyLevel::Group,
//!     category: "items".into(),
//! };
//! let key = KeyResolver::new().resolve(&scope, &QueryParams::new().include(["2", "1"]))?;
//! println!("key: {key}");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod canonical;
mod hash;
mod key;

pub use artifact::{
    ArtifactId, DateRange, EntityRef, HierarchyLevel, NewArtifact, SourceIds, SourceType,
    SummaryArtifact,
};
pub use canonical::{canonical_bytes, canonical_string};
pub use hash::{ContentHash, HashError, SetDigest};
pub use key::{CacheKey, KeyError, KeyResolver, KeyScope, QueryParams, SourceMode};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
