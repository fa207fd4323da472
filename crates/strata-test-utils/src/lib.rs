//! Testing utilities for the strata workspace
//!
//! Scripted collaborators, fixture hierarchies and a seeded engine.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use strata_artifact::{
    ArtifactId, CacheKey, ContentHash, EntityRef, NewArtifact, SummaryArtifact,
};
use strata_core::{
    EngineConfig, GeneratorError, HierarchyConfig, ManualClock, MemoryRecordSource, Record,
    RetryPolicy, SummaryOrchestrator, TextGenerator, TypeConfig,
};
use strata_store::{InMemorySummaryStore, Invalidation, StoreError, SummaryStore, UpsertReceipt};

/// Record kind used by the fixture hierarchy
pub const ITEM: &str = "item";
/// Group type over all items
pub const ALL_ITEMS: &str = "all_items";
/// Global rollup over `all_items`
pub const SYSTEM_WIDE: &str = "system_wide";

/// Fixed start time for fixtures
#[must_use]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// item (24h) -> all_items (24h) -> system_wide (48h)
#[must_use]
pub fn item_hierarchy() -> HierarchyConfig {
    HierarchyConfig::builder()
        .with_type(ITEM, TypeConfig::individual(ITEM, 24).with_category("items"))
        .with_type(ALL_ITEMS, TypeConfig::group(ITEM, 24).with_category("items"))
        .with_type(
            SYSTEM_WIDE,
            TypeConfig::global([ALL_ITEMS], 48).with_category("system"),
        )
        .build()
        .unwrap()
}

/// Fixture config with fast, short retries
#[must_use]
pub fn item_config() -> EngineConfig {
    EngineConfig::new(item_hierarchy())
        .with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        })
        .with_generation_timeout(5)
}

/// Item record created at `t0`
#[must_use]
pub fn item_record(id: &str, body: Value) -> Record {
    Record::new(EntityRef::new(ITEM, id), body, t0())
}

/// Generator returning a deterministic function of its input
///
/// Counts calls and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    failures_left: AtomicU32,
    delay: Mutex<Option<Duration>>,
    templates: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with an unavailable error
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Template keys in call order
    #[must_use]
    pub fn templates(&self) -> Vec<String> {
        self.templates.lock().clone()
    }

    /// Output produced for an input
    #[must_use]
    pub fn expected(text: &str, template_key: &str) -> String {
        format!(
            "[{template_key}] summary of {}",
            ContentHash::compute(text.as_bytes()).short()
        )
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, text: &str, template_key: &str) -> Result<String, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.templates.lock().push(template_key.to_owned());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GeneratorError::Unavailable("scripted failure".into()));
        }
        Ok(Self::expected(text, template_key))
    }
}

/// Store wrapper that fails selected operations
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<InMemorySummaryStore>,
    upsert_failures: AtomicU32,
}

impl FlakyStore {
    #[must_use]
    pub fn new(inner: Arc<InMemorySummaryStore>) -> Self {
        Self {
            inner,
            upsert_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` upserts with [`StoreError::Unavailable`]
    pub fn fail_upserts(&self, n: u32) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<InMemorySummaryStore> {
        &self.inner
    }
}

#[async_trait]
impl SummaryStore for FlakyStore {
    async fn upsert(&self, artifact: NewArtifact) -> Result<UpsertReceipt, StoreError> {
        let failing = self
            .upsert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("scripted upsert failure".into()));
        }
        self.inner.upsert(artifact).await
    }

    async fn get_valid(&self, key: &CacheKey) -> Result<Option<SummaryArtifact>, StoreError> {
        self.inner.get_valid(key).await
    }

    async fn get(&self, id: ArtifactId) -> Result<Option<SummaryArtifact>, StoreError> {
        self.inner.get(id).await
    }

    async fn set_invalid(&self, ids: &BTreeSet<ArtifactId>) -> Result<usize, StoreError> {
        self.inner.set_invalid(ids).await
    }

    async fn mark_verified(
        &self,
        id: ArtifactId,
        expected_hash: ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.mark_verified(id, expected_hash, at).await
    }

    async fn find_ancestors(&self, id: ArtifactId) -> Result<BTreeSet<ArtifactId>, StoreError> {
        self.inner.find_ancestors(id).await
    }

    async fn find_containing(&self, item: &EntityRef) -> Result<BTreeSet<ArtifactId>, StoreError> {
        self.inner.find_containing(item).await
    }

    async fn invalidate_cascade(
        &self,
        roots: &BTreeSet<ArtifactId>,
    ) -> Result<Invalidation, StoreError> {
        self.inner.invalidate_cascade(roots).await
    }
}

/// Engine wired to in-memory collaborators and a manual clock at `t0`
#[derive(Debug)]
pub struct TestEngine {
    pub engine: SummaryOrchestrator,
    pub store: Arc<InMemorySummaryStore>,
    pub flaky: Arc<FlakyStore>,
    pub records: Arc<MemoryRecordSource>,
    pub generator: Arc<ScriptedGenerator>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(item_config())
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemorySummaryStore::new());
        let flaky = Arc::new(FlakyStore::new(Arc::clone(&store)));
        let records = Arc::new(MemoryRecordSource::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let engine = SummaryOrchestrator::builder(config)
            .store(flaky.clone())
            .records(records.clone())
            .generator(generator.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        Self {
            engine,
            store,
            flaky,
            records,
            generator,
            clock,
        }
    }

    /// Insert items `1..=n` with an open status
    #[must_use]
    pub fn seeded(self, n: usize) -> Self {
        for id in 1..=n {
            self.records.upsert(item_record(
                &id.to_string(),
                json!({ "title": format!("item {id}"), "status": "open" }),
            ));
        }
        self
    }

    /// Replace an item's body
    pub fn mutate(&self, id: &str, body: Value) {
        assert!(
            self.records.update_body(&EntityRef::new(ITEM, id), body),
            "item {id} not seeded"
        );
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
