//! Raw record source collaborator
//!
//! The engine never owns source records. It reads them through
//! [`RecordSource`], one record at a time for individual scopes and by
//! filter for groups.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_artifact::{DateRange, EntityRef, QueryParams};

use crate::error::SourceError;

/// One raw source record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: EntityRef,
    pub body: Value,
    pub created_at: DateTime<Utc>,
}

impl Record {
    #[must_use]
    pub fn new(entity: EntityRef, body: Value, created_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            body,
            created_at,
        }
    }

    /// `status` field of the body, if it is a string
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.body.get("status").and_then(Value::as_str)
    }
}

/// Filter for multi-record fetches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Inclusive bounds on `created_at`
    pub date_range: DateRange,
    /// When non-empty, only these ids
    pub include_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
}

impl RecordFilter {
    /// Filter described by normalized request parameters
    #[must_use]
    pub fn from_params(params: &QueryParams) -> Self {
        Self {
            date_range: params.date_range,
            include_ids: params.include_ids.clone(),
            exclude_ids: params.exclude_ids.clone(),
        }
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let id = record.entity.id.as_str();
        self.date_range.contains(record.created_at)
            && (self.include_ids.is_empty() || self.include_ids.iter().any(|i| i == id))
            && !self.exclude_ids.iter().any(|e| e == id)
    }
}

/// Read access to raw source records
#[async_trait]
pub trait RecordSource: Send + Sync + Debug {
    /// One record by kind and id
    ///
    /// # Errors
    /// [`SourceError::NotFound`] when the record does not exist.
    async fn fetch(&self, kind: &str, id: &str) -> Result<Record, SourceError>;

    /// Every record of `kind` matching `filter`, in id order
    async fn fetch_many(&self, kind: &str, filter: &RecordFilter) -> Result<Vec<Record>, SourceError>;
}

/// Record source backed by a concurrent map
///
/// Counts calls so callers can observe how much source work a request did.
#[derive(Debug, Default)]
pub struct MemoryRecordSource {
    records: DashMap<EntityRef, Record>,
    fetches: AtomicUsize,
    fetch_many_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryRecordSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: Record) {
        self.records.insert(record.entity.clone(), record);
    }

    /// Replace the body of an existing record; returns false if absent
    pub fn update_body(&self, entity: &EntityRef, body: Value) -> bool {
        match self.records.get_mut(entity) {
            Some(mut record) => {
                record.body = body;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, entity: &EntityRef) -> Option<Record> {
        self.records.remove(entity).map(|(_, record)| record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Make every call fail with [`SourceError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Single-record fetches served so far
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Multi-record fetches served so far
    #[must_use]
    pub fn fetch_many_count(&self) -> usize {
        self.fetch_many_calls.load(Ordering::SeqCst)
    }

    /// Both counters combined
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.fetch_count() + self.fetch_many_count()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("memory source switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch(&self, kind: &str, id: &str) -> Result<Record, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let entity = EntityRef::new(kind, id);
        self.records
            .get(&entity)
            .map(|r| r.value().clone())
            .ok_or(SourceError::NotFound(entity))
    }

    async fn fetch_many(&self, kind: &str, filter: &RecordFilter) -> Result<Vec<Record>, SourceError> {
        self.fetch_many_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut out: Vec<Record> = self
            .records
            .iter()
            .filter(|entry| entry.key().kind == kind && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.entity.cmp(&b.entity));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(id: &str, day: u32) -> Record {
        Record::new(
            EntityRef::new("ticket", id),
            json!({ "status": "open" }),
            Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let source = MemoryRecordSource::new();
        let err = source.fetch("ticket", "1").await.unwrap_err();
        assert_eq!(err, SourceError::NotFound(EntityRef::new("ticket", "1")));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn fetch_many_applies_filter_and_kind() {
        let source = MemoryRecordSource::new();
        for (id, day) in [("1", 1), ("2", 5), ("3", 10)] {
            source.upsert(record(id, day));
        }
        source.upsert(Record::new(
            EntityRef::new("issue", "1"),
            json!({}),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ));

        let filter = RecordFilter {
            date_range: DateRange::new(
                Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()),
                None,
            ),
            include_ids: Vec::new(),
            exclude_ids: vec!["3".into()],
        };
        let records = source.fetch_many("ticket", &filter).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.entity.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[tokio::test]
    async fn unavailable_source_fails_every_call() {
        let source = MemoryRecordSource::new();
        source.upsert(record("1", 1));
        source.set_unavailable(true);
        assert!(matches!(
            source.fetch("ticket", "1").await,
            Err(SourceError::Unavailable(_))
        ));
        source.set_unavailable(false);
        assert!(source.fetch("ticket", "1").await.is_ok());
    }
}
