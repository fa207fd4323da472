//! Validity decisions for stored artifacts
//!
//! The checker decides; it never writes. Reverification timestamps and
//! cascade invalidation are applied by the orchestrator from the verdict.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use strata_artifact::{ArtifactId, ContentHash, SourceType, SummaryArtifact};

use crate::config::HierarchyConfig;
use crate::error::SummaryError;
use crate::fetcher::SourceDataFetcher;
use crate::types::Validity;

/// Outcome of the cheap checks that need no source access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    /// Flagged invalid; no further work
    Invalid,
    /// Verified within the TTL window; trusted without rehashing
    Fresh,
    /// TTL elapsed; the source hash must be recomputed
    NeedsReverify,
}

/// Pure first stage of the validity decision
#[must_use]
pub fn assess(artifact: &SummaryArtifact, now: DateTime<Utc>, ttl: Duration) -> Assessment {
    if !artifact.is_valid {
        Assessment::Invalid
    } else if artifact.verified_within(now, ttl) {
        Assessment::Fresh
    } else {
        Assessment::NeedsReverify
    }
}

/// Verdict plus the hash it was reached with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub validity: Validity,
    /// Hash the artifact was confirmed against, when reverified
    pub confirmed_hash: Option<ContentHash>,
    /// Consumed artifacts found stale below an invalid aggregate
    pub stale: BTreeSet<ArtifactId>,
}

impl Check {
    fn verdict(validity: Validity) -> Self {
        Self {
            validity,
            confirmed_hash: None,
            stale: BTreeSet::new(),
        }
    }
}

/// Decides Valid / Invalid / Unknown for existing artifacts
#[derive(Debug, Clone)]
pub struct ValidityChecker {
    fetcher: Arc<SourceDataFetcher>,
    ttls: BTreeMap<String, Duration>,
}

impl ValidityChecker {
    #[must_use]
    pub fn new(fetcher: Arc<SourceDataFetcher>, hierarchy: &HierarchyConfig) -> Self {
        let ttls = hierarchy
            .types()
            .map(|(name, ty)| (name.to_owned(), ty.ttl()))
            .collect();
        Self { fetcher, ttls }
    }

    /// Full validity decision
    ///
    /// An aggregate past its TTL first rechecks every consumed child whose
    /// own TTL has elapsed; a stale child makes the aggregate invalid and is
    /// reported in [`Check::stale`]. Missing source content yields
    /// `Unknown`, never an error.
    ///
    /// # Errors
    /// Transient source or store failures while rehashing.
    pub async fn check(
        &self,
        artifact: &SummaryArtifact,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Check, SummaryError> {
        match assess(artifact, now, ttl) {
            Assessment::Invalid => Ok(Check::verdict(Validity::Invalid)),
            Assessment::Fresh => Ok(Check::verdict(Validity::Valid { reverified: false })),
            Assessment::NeedsReverify => self.reverify(artifact, now).await,
        }
    }

    /// Boxed so aggregates can recurse into their children
    fn reverify<'a>(
        &'a self,
        artifact: &'a SummaryArtifact,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Check, SummaryError>> {
        async move {
            if artifact.source_type == SourceType::ExistingSummaries {
                let children = match self.fetcher.children(artifact).await {
                    Ok(children) => children,
                    Err(SummaryError::NotFound(reason)) => {
                        return Ok(Check::verdict(Validity::Unknown(reason)))
                    }
                    Err(err) => return Err(err),
                };

                let mut stale = BTreeSet::new();
                for child in &children {
                    if assess(child, now, self.ttl_of(child)) != Assessment::NeedsReverify {
                        continue;
                    }
                    let verdict = self.reverify(child, now).await?;
                    match verdict.validity {
                        Validity::Valid { .. } => {}
                        Validity::Invalid => {
                            stale.insert(child.id);
                            stale.extend(verdict.stale);
                        }
                        Validity::Unknown(reason) => {
                            return Ok(Check::verdict(Validity::Unknown(reason)))
                        }
                    }
                }
                if !stale.is_empty() {
                    tracing::info!(
                        artifact = %artifact.id,
                        key = %artifact.key,
                        stale = stale.len(),
                        "consumed summaries are stale"
                    );
                    return Ok(Check {
                        validity: Validity::Invalid,
                        confirmed_hash: None,
                        stale,
                    });
                }
            }

            match self.fetcher.rehash(artifact).await {
                Ok(Some(hash)) if hash == artifact.hash_signature => Ok(Check {
                    validity: Validity::Valid { reverified: true },
                    confirmed_hash: Some(hash),
                    stale: BTreeSet::new(),
                }),
                Ok(Some(hash)) => {
                    tracing::info!(
                        artifact = %artifact.id,
                        key = %artifact.key,
                        stored = %artifact.hash_signature.short(),
                        current = %hash.short(),
                        "source content changed"
                    );
                    Ok(Check::verdict(Validity::Invalid))
                }
                Ok(None) => Ok(Check::verdict(Validity::Invalid)),
                Err(SummaryError::NotFound(reason)) => Ok(Check::verdict(Validity::Unknown(reason))),
                Err(err) => Err(err),
            }
        }
        .boxed()
    }

    /// Unknown types are always due for reverification
    fn ttl_of(&self, artifact: &SummaryArtifact) -> Duration {
        self.ttls
            .get(artifact.summary_type())
            .copied()
            .unwrap_or_else(Duration::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strata_artifact::{
        ArtifactId, CacheKey, EntityRef, HierarchyLevel, SourceIds, SourceType,
    };

    fn artifact(verified_at: DateTime<Utc>, is_valid: bool) -> SummaryArtifact {
        SummaryArtifact {
            id: ArtifactId::new(),
            key: CacheKey {
                summary_type: "item".into(),
                hierarchy_level: HierarchyLevel::Individual,
                category: "other".into(),
                date_range_start: None,
                date_range_end: None,
                params: "{}".into(),
            },
            content: "summary".into(),
            template_key: "item".into(),
            source_type: SourceType::RawData,
            source_ids: SourceIds::single(EntityRef::new("item", "1")),
            metadata: serde_json::json!({}),
            hash_signature: ContentHash::compute(b"x"),
            last_generated_at: verified_at,
            last_verified_at: verified_at,
            is_valid,
        }
    }

    #[test]
    fn invalid_flag_short_circuits() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(assess(&artifact(t0, false), t0, Duration::hours(24)), Assessment::Invalid);
    }

    #[test]
    fn within_ttl_is_fresh() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = artifact(t0, true);
        assert_eq!(assess(&a, t0 + Duration::hours(1), Duration::hours(24)), Assessment::Fresh);
    }

    #[test]
    fn ttl_boundary_requires_reverify() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = artifact(t0, true);
        assert_eq!(
            assess(&a, t0 + Duration::hours(24), Duration::hours(24)),
            Assessment::NeedsReverify
        );
        assert_eq!(assess(&a, t0, Duration::zero()), Assessment::NeedsReverify);
    }
}
