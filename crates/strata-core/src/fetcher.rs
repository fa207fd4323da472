//! Source resolution and content hashing
//!
//! [`SourceDataFetcher`] turns a normalized request into the records or
//! child artifacts it depends on, the payload handed to the generator and a
//! content hash. The same hashing functions serve generation and
//! reverification, so an unchanged source always reproduces the stored
//! `hash_signature`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use strata_artifact::{
    canonical_string, ContentHash, DateRange, QueryParams, SetDigest, SourceIds, SourceMode, SourceType,
    SummaryArtifact,
};
use strata_store::SummaryStore;

use crate::error::SummaryError;
use crate::source::{Record, RecordFilter, RecordSource};
use crate::strategy::{SourceStrategy, StrategyTable};
use crate::types::SummaryRequest;

const CLOSED_STATUSES: &[&str] = &["closed", "solved", "resolved", "done"];

/// Resolved source content for one scope
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub source_type: SourceType,
    pub source_ids: SourceIds,
    /// Structured content the generator input is rendered from
    pub payload: Value,
    pub hash: ContentHash,
    /// Derived counts stored with the artifact
    pub metadata: Value,
}

impl ResolvedSource {
    /// Deterministic generator input
    #[must_use]
    pub fn text(&self) -> String {
        canonical_string(&self.payload)
    }
}

/// Outcome of resolving a scope
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePlan {
    /// Built from raw records; ready to generate
    Ready(ResolvedSource),
    /// Needs these child summaries first
    ///
    /// Rollups request their groups in summaries mode, so the dependency
    /// graph links every level down to individual summaries.
    Children(Vec<SummaryRequest>),
}

/// Resolves scopes to records or child artifacts
pub struct SourceDataFetcher {
    records: Arc<dyn RecordSource>,
    store: Arc<dyn SummaryStore>,
    strategies: StrategyTable,
}

impl fmt::Debug for SourceDataFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDataFetcher")
            .field("strategies", &self.strategies.len())
            .finish_non_exhaustive()
    }
}

impl SourceDataFetcher {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordSource>,
        store: Arc<dyn SummaryStore>,
        strategies: StrategyTable,
    ) -> Self {
        Self {
            records,
            store,
            strategies,
        }
    }

    #[must_use]
    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    /// Resolve a normalized request
    ///
    /// # Errors
    /// - `NotFound` when an individual scope's record does not exist
    /// - `Validation` for unknown types
    /// - `TransientIo` when the record source is unavailable
    pub async fn resolve(
        &self,
        summary_type: &str,
        params: &QueryParams,
    ) -> Result<SourcePlan, SummaryError> {
        match self.strategies.get(summary_type)? {
            SourceStrategy::SingleRecord { entity } => {
                let id = params.item_id.as_deref().ok_or_else(|| {
                    SummaryError::Validation(format!("summary type '{summary_type}' requires an item_id"))
                })?;
                let record = self.records.fetch(entity, id).await?;
                Ok(SourcePlan::Ready(from_records(vec![record], None)))
            }
            SourceStrategy::Collection {
                entity,
                member_type,
            } => {
                let filter = RecordFilter::from_params(params);
                let records = self.records.fetch_many(entity, &filter).await?;
                tracing::debug!(summary_type, entity, records = records.len(), "resolved collection");
                match params.source_mode {
                    SourceMode::Raw => Ok(SourcePlan::Ready(from_records(
                        records,
                        Some(params.date_range),
                    ))),
                    SourceMode::Summaries => Ok(SourcePlan::Children(
                        records
                            .iter()
                            .map(|r| SummaryRequest::item(member_type.clone(), r.entity.id.clone()))
                            .collect(),
                    )),
                }
            }
            SourceStrategy::Rollup { parts } => Ok(SourcePlan::Children(
                parts
                    .iter()
                    .map(|part| {
                        SummaryRequest::new(
                            part.clone(),
                            QueryParams::new()
                                .with_date_range(params.date_range)
                                .with_source_mode(SourceMode::Summaries),
                        )
                    })
                    .collect(),
            )),
        }
    }

    /// Build the source for a scope from its resolved child artifacts
    #[must_use]
    pub fn aggregate(&self, params: &QueryParams, children: &[SummaryArtifact]) -> ResolvedSource {
        from_children(children, params)
    }

    /// Recompute the current hash over an artifact's source ids
    ///
    /// Returns `None` when a consumed child artifact is no longer valid.
    ///
    /// # Errors
    /// `NotFound` when a referenced record or artifact is gone;
    /// `TransientIo` on source or store failures.
    pub async fn rehash(&self, artifact: &SummaryArtifact) -> Result<Option<ContentHash>, SummaryError> {
        match artifact.source_type {
            SourceType::RawData => {
                let mut records = Vec::with_capacity(artifact.source_ids.items.len());
                for item in &artifact.source_ids.items {
                    records.push(self.records.fetch(&item.kind, &item.id).await?);
                }
                Ok(Some(hash_records(&records)))
            }
            SourceType::ExistingSummaries => {
                let children = self.children(artifact).await?;
                if children.iter().any(|child| !child.is_valid) {
                    return Ok(None);
                }
                Ok(Some(hash_children(&children)))
            }
        }
    }

    /// Current rows of the artifacts an aggregate was built from
    ///
    /// # Errors
    /// `NotFound` when a child row is gone; store failures.
    pub async fn children(&self, artifact: &SummaryArtifact) -> Result<Vec<SummaryArtifact>, SummaryError> {
        let mut children = Vec::with_capacity(artifact.source_ids.artifacts.len());
        for id in &artifact.source_ids.artifacts {
            let child = self
                .store
                .get(*id)
                .await?
                .ok_or_else(|| SummaryError::NotFound(format!("artifact {id}")))?;
            children.push(child);
        }
        Ok(children)
    }
}

/// Order-independent hash over raw records
#[must_use]
pub fn hash_records(records: &[Record]) -> ContentHash {
    let mut digest = SetDigest::new();
    for record in records {
        digest.add_json(
            record.entity.to_string(),
            &json!({ "body": record.body, "created_at": record.created_at }),
        );
    }
    digest.finish()
}

/// Order-independent hash over child artifacts
#[must_use]
pub fn hash_children(children: &[SummaryArtifact]) -> ContentHash {
    let mut digest = SetDigest::new();
    for child in children {
        digest.add_json(
            child.id.to_string(),
            &json!({
                "hash_signature": child.hash_signature.to_string(),
                "content": child.content,
            }),
        );
    }
    digest.finish()
}

fn from_records(mut records: Vec<Record>, date_range: Option<DateRange>) -> ResolvedSource {
    records.sort_by(|a, b| a.entity.cmp(&b.entity));
    let metadata = record_metadata(&records);
    let hash = hash_records(&records);
    let source_ids = SourceIds {
        items: records.iter().map(|r| r.entity.clone()).collect(),
        artifacts: Default::default(),
        date_range,
    };
    let payload = json!({
        "records": records
            .iter()
            .map(|r| json!({
                "entity": r.entity.to_string(),
                "created_at": r.created_at,
                "body": r.body,
            }))
            .collect::<Vec<_>>(),
        "metadata": metadata,
    });
    ResolvedSource {
        source_type: SourceType::RawData,
        source_ids,
        payload,
        hash,
        metadata,
    }
}

fn from_children(children: &[SummaryArtifact], params: &QueryParams) -> ResolvedSource {
    let mut sorted: Vec<&SummaryArtifact> = children.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let source_ids = SourceIds {
        items: sorted
            .iter()
            .flat_map(|c| c.source_ids.items.iter().cloned())
            .collect(),
        artifacts: sorted.iter().map(|c| c.id).collect(),
        date_range: Some(params.date_range),
    };

    let mut by_type: BTreeMap<&str, u64> = BTreeMap::new();
    for child in &sorted {
        *by_type.entry(child.summary_type()).or_default() += 1;
    }
    let metadata = json!({
        "child_count": sorted.len(),
        "record_count": source_ids.items.len(),
        "children_by_type": by_type,
    });

    let payload = json!({
        "summaries": sorted
            .iter()
            .map(|c| json!({
                "summary_type": c.summary_type(),
                "items": c.source_ids.items.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "content": c.content,
            }))
            .collect::<Vec<_>>(),
        "metadata": metadata,
    });

    ResolvedSource {
        source_type: SourceType::ExistingSummaries,
        hash: hash_children(children),
        source_ids,
        payload,
        metadata,
    }
}

fn record_metadata(records: &[Record]) -> Value {
    let mut meta = Map::new();
    meta.insert("record_count".into(), json!(records.len()));

    let mut distribution: BTreeMap<String, u64> = BTreeMap::new();
    for status in records.iter().filter_map(Record::status) {
        *distribution.entry(status.to_lowercase()).or_default() += 1;
    }
    if !distribution.is_empty() {
        let closed: u64 = distribution
            .iter()
            .filter(|(status, _)| CLOSED_STATUSES.contains(&status.as_str()))
            .map(|(_, n)| n)
            .sum();
        let with_status: u64 = distribution.values().sum();
        meta.insert("open_count".into(), json!(with_status - closed));
        meta.insert("closed_count".into(), json!(closed));
        meta.insert("status_distribution".into(), json!(distribution));
    }
    Value::Object(meta)
}
