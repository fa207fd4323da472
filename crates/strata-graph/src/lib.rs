//! Strata Dependency Graph
//!
//! Tracks parent -> child aggregation edges between summary artifacts and
//! computes the transitive set of ancestors to invalidate when an artifact
//! changes.
//!
//! Children are always committed before the parents that reference them,
//! so the graph is a DAG by construction. Edge insertion still rejects
//! cycles and the ancestor walk asserts acyclicity.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod dag;
mod error;

pub use dag::{DependencyEdge, DependencyGraph, Relation};
pub use error::GraphError;
