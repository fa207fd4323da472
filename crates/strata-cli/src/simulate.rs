//! Seeded end-to-end run of the summary workflow
//!
//! Seeds every individual type's entity with `items` records, then runs
//! three passes over every configured type: a cold pass, a warm pass that
//! must be served from cache, and a pass after one record changed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use strata_artifact::{ContentHash, EntityRef, HierarchyLevel, QueryParams};
use strata_core::{
    EngineConfig, GeneratorError, MemoryRecordSource, Record, StatsSnapshot, SummaryOrchestrator,
    SummaryRequest, TextGenerator,
};
use strata_store::{InMemorySummaryStore, StoreStats};

const STATUSES: &[&str] = &["open", "pending", "solved", "closed"];

/// Deterministic generator standing in for a language model
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LocalGenerator;

#[async_trait]
impl TextGenerator for LocalGenerator {
    async fn generate(&self, text: &str, template_key: &str) -> Result<String, GeneratorError> {
        if text.is_empty() {
            return Err(GeneratorError::Failed("empty generator input".into()));
        }
        Ok(format!(
            "{template_key}: {} bytes of source, digest {}",
            text.len(),
            ContentHash::compute(text.as_bytes()).short()
        ))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SimulateOptions {
    /// Records seeded per individual type
    pub(crate) items: usize,
    pub(crate) snapshot: Option<PathBuf>,
}

#[derive(Debug)]
pub(crate) struct SimulationReport {
    /// One JSON object per outcome, invalidation and pass
    pub(crate) events: Vec<Value>,
    pub(crate) stats: StatsSnapshot,
    pub(crate) store: StoreStats,
}

pub(crate) async fn run(config: EngineConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    let store = Arc::new(InMemorySummaryStore::new());
    let records = Arc::new(MemoryRecordSource::new());
    let entities = seed(&config, &records, options.items);
    tracing::info!(
        entities = entities.len(),
        items = options.items,
        records = records.len(),
        "seeded record source"
    );

    let requests = requests(&config, options.items);
    let engine = SummaryOrchestrator::builder(config)
        .store(store.clone())
        .records(records.clone())
        .generator(Arc::new(LocalGenerator))
        .build()?;

    let mut events = Vec::new();
    run_pass(&engine, "cold", &requests, &mut events).await;
    run_pass(&engine, "warm", &requests, &mut events).await;

    if let Some(entity) = entities.first() {
        let changed = EntityRef::new(entity.clone(), "1");
        records.update_body(
            &changed,
            json!({ "title": format!("{entity} 1 (edited)"), "status": "closed" }),
        );
        let invalidation = engine.record_changed(&changed).await?;
        events.push(json!({
            "event": "record_changed",
            "record": changed.to_string(),
            "invalidated": invalidation.flipped,
        }));
    }
    run_pass(&engine, "after_change", &requests, &mut events).await;

    if let Some(path) = &options.snapshot {
        store.snapshot().save_to(path).await?;
    }

    Ok(SimulationReport {
        events,
        stats: engine.stats(),
        store: store.stats(),
    })
}

/// Seed records for every individual type; returns the seeded entity kinds
fn seed(config: &EngineConfig, records: &MemoryRecordSource, items: usize) -> Vec<String> {
    let now = Utc::now();
    let mut entities: Vec<String> = config
        .hierarchy
        .types()
        .filter(|(_, ty)| ty.level == HierarchyLevel::Individual)
        .filter_map(|(_, ty)| ty.entity.clone())
        .collect();
    entities.sort();
    entities.dedup();

    for entity in &entities {
        for i in 1..=items {
            let hours = i64::try_from(i).unwrap_or(i64::MAX);
            records.upsert(Record::new(
                EntityRef::new(entity.clone(), i.to_string()),
                json!({
                    "title": format!("{entity} {i}"),
                    "status": STATUSES[i % STATUSES.len()],
                }),
                now - Duration::hours(hours),
            ));
        }
    }
    entities
}

/// Every type in dependency order; individuals once per seeded id
fn requests(config: &EngineConfig, items: usize) -> Vec<SummaryRequest> {
    let mut out = Vec::new();
    for name in config.hierarchy.dependency_order() {
        let Some(ty) = config.hierarchy.get(name) else {
            continue;
        };
        match ty.level {
            HierarchyLevel::Individual => {
                out.extend((1..=items).map(|i| SummaryRequest::item(name.clone(), i.to_string())));
            }
            HierarchyLevel::Group | HierarchyLevel::Global => {
                out.push(SummaryRequest::new(name.clone(), QueryParams::new()));
            }
        }
    }
    out
}

async fn run_pass(
    engine: &SummaryOrchestrator,
    pass: &str,
    requests: &[SummaryRequest],
    events: &mut Vec<Value>,
) {
    let mut generated = 0usize;
    for request in requests {
        match engine.get_or_generate(request.clone()).await {
            Ok(outcome) => {
                if !outcome.cached {
                    generated += 1;
                }
                let artifact = &outcome.artifact;
                events.push(json!({
                    "event": "summary",
                    "pass": pass,
                    "summary_type": request.summary_type,
                    "artifact": artifact.id.to_string(),
                    "cached": outcome.cached,
                    "hash": artifact.hash_signature.short(),
                    "content": artifact.content,
                }));
            }
            Err(err) => {
                events.push(json!({
                    "event": "error",
                    "pass": pass,
                    "summary_type": request.summary_type,
                    "error": err.to_string(),
                    "retryable": err.is_retryable(),
                }));
            }
        }
    }
    tracing::info!(pass, requests = requests.len(), generated, "simulation pass complete");
    events.push(json!({
        "event": "pass",
        "pass": pass,
        "requests": requests.len(),
        "generated": generated,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLED: &str = include_str!("../../../config/hierarchy.toml");

    fn passes(report: &SimulationReport) -> Vec<(String, u64)> {
        report
            .events
            .iter()
            .filter(|e| e["event"] == "pass")
            .map(|e| (e["pass"].as_str().unwrap().to_owned(), e["generated"].as_u64().unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn local_generator_is_deterministic() {
        let a = LocalGenerator.generate("payload", "t").await.unwrap();
        let b = LocalGenerator.generate("payload", "t").await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("t: 7 bytes"));
        assert!(LocalGenerator.generate("", "t").await.is_err());
    }

    #[tokio::test]
    async fn bundled_hierarchy_simulates_cold_warm_and_change() {
        let config = EngineConfig::from_toml_str(BUNDLED).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let options = SimulateOptions {
            items: 3,
            snapshot: Some(path.clone()),
        };

        let report = run(config, &options).await.unwrap();
        assert!(report.events.iter().all(|e| e["event"] != "error"));

        let passes = passes(&report);
        assert_eq!(passes.len(), 3);
        // 9 individuals, 3 raw groups, 1 rollup
        assert_eq!(passes[0], ("cold".to_owned(), 13));
        assert_eq!(passes[1], ("warm".to_owned(), 0));
        assert!(passes[2].1 > 0);

        let loaded = InMemorySummaryStore::load(&path).await.unwrap();
        assert_eq!(loaded.stats().rows, report.store.rows);
        assert_eq!(report.store.valid_rows, report.store.rows);
    }
}
