//! Summary orchestrator
//!
//! Drives the get-or-generate workflow for one request:
//!
//! ```text
//! CheckCache -> (valid) Done
//!            -> Fetch -> Generate -> Store -> CascadeInvalidate -> Done
//! any error  -> Failed (nothing committed, prior row untouched)
//! ```
//!
//! Aggregate scopes get-or-generate their children first, so every child
//! is committed before the parent that references it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use moka::future::Cache;
use strata_artifact::{
    ArtifactId, CacheKey, EntityRef, HierarchyLevel, KeyResolver, KeyScope, NewArtifact,
    QueryParams, SummaryArtifact,
};
use strata_store::{Invalidation, SummaryStore};
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{ConfigError, SummaryError};
use crate::fetcher::{SourceDataFetcher, SourcePlan};
use crate::generator::{generate_with_retry, TemplateRegistry, TextGenerator};
use crate::source::RecordSource;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::strategy::StrategyTable;
use crate::types::{Stage, SummaryOutcome, SummaryRequest, Validity};
use crate::validity::ValidityChecker;

/// Child summaries resolved concurrently per aggregate
const CHILD_CONCURRENCY: usize = 8;

/// Upper bound on tracked in-flight generations
const IN_FLIGHT_CAPACITY: u64 = 10_000;

/// Report from [`SummaryOrchestrator::check`]
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub key: CacheKey,
    /// Verdict on the stored row; `None` when no valid row exists
    pub validity: Option<Validity>,
    /// The row, when it is servable
    pub artifact: Option<SummaryArtifact>,
}

/// Request state shared by the workflow stages
struct RequestContext {
    summary_type: String,
    scope: KeyScope,
    params: QueryParams,
    key: CacheKey,
    force: bool,
}

/// Root of the summary engine
pub struct SummaryOrchestrator {
    config: EngineConfig,
    resolver: KeyResolver,
    store: Arc<dyn SummaryStore>,
    fetcher: Arc<SourceDataFetcher>,
    checker: ValidityChecker,
    generator: Arc<dyn TextGenerator>,
    templates: TemplateRegistry,
    clock: Arc<dyn Clock>,
    stats: EngineStats,
    in_flight: Option<Cache<CacheKey, SummaryOutcome>>,
}

impl fmt::Debug for SummaryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryOrchestrator")
            .field("types", &self.config.hierarchy.len())
            .field("single_flight", &self.in_flight.is_some())
            .field("store", &self.store)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl SummaryOrchestrator {
    #[must_use]
    pub fn builder(config: EngineConfig) -> SummaryOrchestratorBuilder {
        SummaryOrchestratorBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SummaryStore> {
        &self.store
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve a valid cached summary or generate, store and return a new one
    ///
    /// # Errors
    /// - `Validation` for unknown types or malformed parameters (no I/O done)
    /// - `NotFound` when a required record is missing
    /// - `TransientIo` on store or source hiccups
    /// - `Generation` when the generator fails after its retry budget
    pub async fn get_or_generate(
        &self,
        request: SummaryRequest,
    ) -> Result<SummaryOutcome, SummaryError> {
        self.run(request).await
    }

    /// Current validity of a request's artifact without generating
    ///
    /// Reverification and invalidation side effects are applied as in
    /// [`SummaryOrchestrator::get_or_generate`].
    ///
    /// # Errors
    /// Validation, store or source errors.
    pub async fn check(&self, request: &SummaryRequest) -> Result<CheckReport, SummaryError> {
        let ctx = self.context(request)?;
        let Some(existing) = self.store.get_valid(&ctx.key).await? else {
            return Ok(CheckReport {
                key: ctx.key,
                validity: None,
                artifact: None,
            });
        };
        let (validity, artifact) = self.validate_existing(&ctx, existing).await?;
        Ok(CheckReport {
            key: ctx.key,
            validity: Some(validity),
            artifact,
        })
    }

    /// Invalidate an artifact and every artifact depending on it
    ///
    /// # Errors
    /// Store errors.
    pub async fn invalidate(&self, artifact_id: ArtifactId) -> Result<Invalidation, SummaryError> {
        let roots: BTreeSet<ArtifactId> = [artifact_id].into_iter().collect();
        let result = self.store.invalidate_cascade(&roots).await?;
        self.stats.invalidated(result.flipped);
        tracing::info!(
            artifact = %artifact_id,
            closure = result.ids.len(),
            flipped = result.flipped,
            "invalidated artifact and ancestors"
        );
        Ok(result)
    }

    /// Invalidate every artifact whose sources contain `item`, and their ancestors
    ///
    /// # Errors
    /// Store errors.
    pub async fn invalidate_containing(&self, item: &EntityRef) -> Result<Invalidation, SummaryError> {
        let roots = self.store.find_containing(item).await?;
        if roots.is_empty() {
            return Ok(Invalidation::default());
        }
        let result = self.store.invalidate_cascade(&roots).await?;
        self.stats.invalidated(result.flipped);
        tracing::info!(
            item = %item,
            containing = roots.len(),
            flipped = result.flipped,
            "invalidated artifacts containing record"
        );
        Ok(result)
    }

    /// Change notification for a raw record
    ///
    /// # Errors
    /// Store errors.
    pub async fn record_changed(&self, item: &EntityRef) -> Result<Invalidation, SummaryError> {
        tracing::debug!(item = %item, "record change notification");
        self.invalidate_containing(item).await
    }

    fn context(&self, request: &SummaryRequest) -> Result<RequestContext, SummaryError> {
        let scope = self
            .config
            .hierarchy
            .scope(&request.summary_type)
            .ok_or_else(|| SummaryError::unknown_type(&request.summary_type))?;
        let params = self.resolver.normalize(&scope, &request.params)?;
        let key = self.resolver.resolve(&scope, &params)?;
        Ok(RequestContext {
            summary_type: request.summary_type.clone(),
            scope,
            params,
            key,
            force: request.force_regenerate,
        })
    }

    fn ttl(&self, summary_type: &str) -> Result<chrono::Duration, SummaryError> {
        self.config
            .hierarchy
            .get(summary_type)
            .map(crate::config::TypeConfig::ttl)
            .ok_or_else(|| SummaryError::unknown_type(summary_type))
    }

    /// Boxed so aggregate scopes can recurse into their children
    fn run(&self, request: SummaryRequest) -> BoxFuture<'_, Result<SummaryOutcome, SummaryError>> {
        async move {
            let ctx = self.context(&request)?;
            let span = tracing::info_span!(
                "summary",
                summary_type = %ctx.summary_type,
                key = %ctx.key,
            );

            async move {
                let mut stage = Stage::CheckCache;
                match self.drive(&ctx, &mut stage).await {
                    Ok(outcome) => {
                        advance(&mut stage, Stage::Done);
                        Ok(outcome)
                    }
                    Err(err) => {
                        self.stats.failed();
                        tracing::error!(stage = %stage, error = %err, "summary request failed");
                        advance(&mut stage, Stage::Failed);
                        Err(err)
                    }
                }
            }
            .instrument(span)
            .await
        }
        .boxed()
    }

    async fn drive(&self, ctx: &RequestContext, stage: &mut Stage) -> Result<SummaryOutcome, SummaryError> {
        if ctx.force {
            tracing::debug!("force_regenerate set, skipping cache");
        } else if let Some(existing) = self.store.get_valid(&ctx.key).await? {
            if let (Validity::Valid { .. }, Some(artifact)) =
                self.validate_existing(ctx, existing).await?
            {
                self.stats.hit();
                tracing::info!(artifact = %artifact.id, "serving cached summary");
                return Ok(SummaryOutcome {
                    artifact,
                    cached: true,
                });
            }
        }
        self.stats.miss();

        match &self.in_flight {
            Some(in_flight) => {
                let result = in_flight
                    .try_get_with(ctx.key.clone(), self.generate(ctx, stage))
                    .await
                    .map_err(|shared| (*shared).clone());
                in_flight.invalidate(&ctx.key).await;
                result
            }
            None => self.generate(ctx, stage).await,
        }
    }

    /// Apply the validity verdict for a stored row
    ///
    /// Returns the (possibly reverified) row when it is servable.
    async fn validate_existing(
        &self,
        ctx: &RequestContext,
        existing: SummaryArtifact,
    ) -> Result<(Validity, Option<SummaryArtifact>), SummaryError> {
        let now = self.clock.now();
        let ttl = self.ttl(&ctx.summary_type)?;
        let check = self.checker.check(&existing, now, ttl).await?;

        match check.validity {
            Validity::Valid { reverified } => {
                let mut artifact = existing;
                if let Some(hash) = check.confirmed_hash {
                    if self.store.mark_verified(artifact.id, hash, now).await? {
                        artifact.last_verified_at = now;
                    }
                    self.stats.reverified();
                    tracing::debug!(artifact = %artifact.id, "reverified against source");
                }
                Ok((Validity::Valid { reverified }, Some(artifact)))
            }
            Validity::Invalid => {
                let mut roots: BTreeSet<ArtifactId> = check.stale;
                roots.insert(existing.id);
                let result = self.store.invalidate_cascade(&roots).await?;
                self.stats.invalidated(result.flipped);
                tracing::info!(
                    artifact = %existing.id,
                    flipped = result.flipped,
                    "stale summary invalidated with ancestors"
                );
                Ok((Validity::Invalid, None))
            }
            Validity::Unknown(reason) => {
                tracing::warn!(artifact = %existing.id, reason = %reason, "validity unknown, treating as miss");
                Ok((Validity::Unknown(reason), None))
            }
        }
    }

    async fn generate(&self, ctx: &RequestContext, stage: &mut Stage) -> Result<SummaryOutcome, SummaryError> {
        advance(stage, Stage::Fetch);
        let resolved = match self.fetcher.resolve(&ctx.summary_type, &ctx.params).await? {
            SourcePlan::Ready(resolved) => resolved,
            SourcePlan::Children(requests) => {
                let children: Vec<SummaryArtifact> = futures::stream::iter(requests)
                    .map(|request| self.run(request))
                    .buffered(CHILD_CONCURRENCY)
                    .map_ok(|outcome| outcome.artifact)
                    .try_collect()
                    .await?;
                self.fetcher.aggregate(&ctx.params, &children)
            }
        };

        advance(stage, Stage::Generate);
        let template_key = self.templates.template_for(&ctx.summary_type, resolved.source_type)?;
        let content = generate_with_retry(
            self.generator.as_ref(),
            &resolved.text(),
            &template_key,
            &self.config.retry,
            self.config.generation_timeout(),
        )
        .await?;

        advance(stage, Stage::Store);
        let items = resolved.source_ids.items.clone();
        let receipt = self
            .store
            .upsert(NewArtifact {
                key: ctx.key.clone(),
                content,
                template_key,
                source_type: resolved.source_type,
                source_ids: resolved.source_ids,
                metadata: resolved.metadata,
                hash_signature: resolved.hash,
                generated_at: self.clock.now(),
            })
            .await?;
        self.stats.generated();
        tracing::info!(
            artifact = %receipt.id,
            replaced = receipt.replaced,
            hash = %resolved.hash.short(),
            "stored generated summary"
        );

        advance(stage, Stage::CascadeInvalidate);
        let mut roots = BTreeSet::new();
        if receipt.replaced {
            roots.extend(self.store.find_ancestors(receipt.id).await?);
        }
        if ctx.scope.hierarchy_level == HierarchyLevel::Individual {
            for item in &items {
                for id in self.store.find_containing(item).await? {
                    if id == receipt.id || roots.contains(&id) {
                        continue;
                    }
                    let higher = self
                        .store
                        .get(id)
                        .await?
                        .is_some_and(|row| row.hierarchy_level() > HierarchyLevel::Individual);
                    if higher {
                        roots.insert(id);
                    }
                }
            }
        }
        if !roots.is_empty() {
            let result = self.store.invalidate_cascade(&roots).await?;
            self.stats.invalidated(result.flipped);
            tracing::info!(roots = roots.len(), flipped = result.flipped, "cascade after store");
        }

        let artifact = self
            .store
            .get(receipt.id)
            .await?
            .ok_or_else(|| SummaryError::NotFound(format!("artifact {} vanished after store", receipt.id)))?;
        Ok(SummaryOutcome {
            artifact,
            cached: false,
        })
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// Builder for [`SummaryOrchestrator`]
pub struct SummaryOrchestratorBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn SummaryStore>>,
    records: Option<Arc<dyn RecordSource>>,
    generator: Option<Arc<dyn TextGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    strategies: Option<StrategyTable>,
}

impl fmt::Debug for SummaryOrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryOrchestratorBuilder")
            .field("store", &self.store.is_some())
            .field("records", &self.records.is_some())
            .field("generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

impl SummaryOrchestratorBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            records: None,
            generator: None,
            clock: None,
            strategies: None,
        }
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn SummaryStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn records(mut self, records: Arc<dyn RecordSource>) -> Self {
        self.records = Some(records);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Defaults to [`SystemClock`]
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`StrategyTable::from_hierarchy`]
    #[must_use]
    pub fn strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Validate configuration and assemble the engine
    ///
    /// # Errors
    /// Missing collaborators, invalid config or a strategy table that does
    /// not cover the hierarchy.
    pub fn build(self) -> Result<SummaryOrchestrator, ConfigError> {
        let required = |field: &'static str| ConfigError::InvalidValue {
            field,
            reason: "required".to_string(),
        };
        let store = self.store.ok_or_else(|| required("store"))?;
        let records = self.records.ok_or_else(|| required("records"))?;
        let generator = self.generator.ok_or_else(|| required("generator"))?;

        self.config.validate()?;
        let strategies = match self.strategies {
            Some(table) => table,
            None => StrategyTable::from_hierarchy(&self.config.hierarchy)?,
        };
        strategies.validate(&self.config.hierarchy)?;

        let fetcher = Arc::new(SourceDataFetcher::new(records, Arc::clone(&store), strategies));
        let in_flight = self
            .config
            .single_flight
            .then(|| Cache::builder().max_capacity(IN_FLIGHT_CAPACITY).build());

        tracing::info!(
            types = self.config.hierarchy.len(),
            single_flight = self.config.single_flight,
            max_attempts = self.config.retry.max_attempts,
            "summary orchestrator ready"
        );

        Ok(SummaryOrchestrator {
            templates: TemplateRegistry::from_hierarchy(&self.config.hierarchy),
            resolver: KeyResolver::new(),
            checker: ValidityChecker::new(Arc::clone(&fetcher), &self.config.hierarchy),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            stats: EngineStats::default(),
            config: self.config,
            store,
            fetcher,
            generator,
            in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{HierarchyConfig, TypeConfig};
    use crate::error::GeneratorError;
    use crate::generator::MockTextGenerator;
    use crate::source::{MemoryRecordSource, Record};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use strata_store::InMemorySummaryStore;

    fn engine(generator: MockTextGenerator) -> (SummaryOrchestrator, Arc<InMemorySummaryStore>) {
        let hierarchy = HierarchyConfig::builder()
            .with_type("item", TypeConfig::individual("item", 24))
            .build()
            .unwrap();
        let config = EngineConfig::new(hierarchy).with_retry(crate::config::RetryPolicy::no_retry());
        let store = Arc::new(InMemorySummaryStore::new());
        let records = Arc::new(MemoryRecordSource::new());
        records.upsert(Record::new(
            EntityRef::new("item", "42"),
            json!({ "title": "broken login" }),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let orchestrator = SummaryOrchestrator::builder(config)
            .store(store.clone())
            .records(records)
            .generator(Arc::new(generator))
            .clock(Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            )))
            .build()
            .unwrap();
        (orchestrator, store)
    }

    #[tokio::test]
    async fn unknown_type_is_rejected_before_io() {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().never();
        let (orchestrator, store) = engine(generator);

        let err = orchestrator
            .get_or_generate(SummaryRequest::item("nope", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::Validation(_)));
        assert_eq!(store.stats().rows, 0);
    }

    #[tokio::test]
    async fn generator_failure_commits_nothing() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(GeneratorError::Failed("model refused".into())));
        let (orchestrator, store) = engine(generator);

        let err = orchestrator
            .get_or_generate(SummaryRequest::item("item", "42"))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::Generation { attempts: 1, .. }));
        assert_eq!(store.stats().rows, 0);
        assert_eq!(orchestrator.stats().failures, 1);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().never();
        let (orchestrator, _) = engine(generator);

        let err = orchestrator
            .get_or_generate(SummaryRequest::item("item", "7"))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::NotFound(_)));
    }

    #[tokio::test]
    async fn template_and_payload_reach_generator() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .withf(|text: &str, template: &str| template == "item" && text.contains("broken login"))
            .times(1)
            .returning(|_, _| Ok("login is broken".into()));
        let (orchestrator, _) = engine(generator);

        let outcome = orchestrator
            .get_or_generate(SummaryRequest::item("item", "42"))
            .await
            .unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.artifact.content, "login is broken");
        assert_eq!(outcome.artifact.metadata["record_count"], 1);
    }

    #[tokio::test]
    async fn check_never_generates() {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().never();
        let (orchestrator, _) = engine(generator);

        let report = orchestrator
            .check(&SummaryRequest::item("item", "42"))
            .await
            .unwrap();
        assert!(report.validity.is_none());
        assert!(report.artifact.is_none());
    }
}
