//! # Strata Store
//!
//! Keyed storage for summary artifacts.
//!
//! The [`SummaryStore`] trait is the contract every backend honors: one row
//! per cache key, atomic replacement, batch invalidation and an ancestor walk
//! over recorded dependency edges. [`InMemorySummaryStore`] is the bundled
//! backend; it can be exported to and rebuilt from a [`StoreSnapshot`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod memory;
mod snapshot;
mod store;

pub use error::StoreError;
pub use memory::{InMemorySummaryStore, StoreStats};
pub use snapshot::{StoreSnapshot, SNAPSHOT_VERSION};
pub use store::{Invalidation, SummaryStore, UpsertReceipt};
