//! Text generator collaborator, template selection and retry
//!
//! The engine treats generation as an opaque, possibly slow and flaky call.
//! Every attempt is bounded by a timeout; failed attempts are retried with
//! exponential backoff up to the configured attempt budget.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use strata_artifact::SourceType;

use crate::config::{HierarchyConfig, RetryPolicy};
use crate::error::{GeneratorError, SummaryError};

/// Suffix of template keys used when summarizing existing summaries
pub const AGGREGATE_SUFFIX: &str = "_aggregate";

/// Turns formatted source text into a summary
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a summary of `text` with the template named `template_key`
    async fn generate(&self, text: &str, template_key: &str) -> Result<String, GeneratorError>;
}

/// Pure `summary_type -> template key` lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, String>,
}

impl TemplateRegistry {
    /// Template per configured type; defaults to the type name
    #[must_use]
    pub fn from_hierarchy(hierarchy: &HierarchyConfig) -> Self {
        let templates = hierarchy
            .types()
            .map(|(name, ty)| {
                let template = ty.template.clone().unwrap_or_else(|| name.to_owned());
                (name.to_owned(), template)
            })
            .collect();
        Self { templates }
    }

    /// Template key for a type and source kind
    ///
    /// # Errors
    /// [`SummaryError::Validation`] for unknown types.
    pub fn template_for(
        &self,
        summary_type: &str,
        source_type: SourceType,
    ) -> Result<String, SummaryError> {
        let base = self
            .templates
            .get(summary_type)
            .ok_or_else(|| SummaryError::unknown_type(summary_type))?;
        Ok(match source_type {
            SourceType::RawData => base.clone(),
            SourceType::ExistingSummaries => format!("{base}{AGGREGATE_SUFFIX}"),
        })
    }
}

/// Call the generator under `policy`, bounding each attempt by `timeout`
///
/// # Errors
/// [`SummaryError::Generation`] once every attempt has failed.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    text: &str,
    template_key: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<String, SummaryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, generator.generate(text, template_key)).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout(timeout.as_secs())),
        };

        match result {
            Ok(summary) => return Ok(summary),
            Err(err) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    template_key,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "generator call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(template_key, attempts = attempt, error = %err, "generator retries exhausted");
                return Err(SummaryError::Generation {
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeConfig;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let mut generator = MockTextGenerator::new();
        let mut seq = Sequence::new();
        generator
            .expect_generate()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(GeneratorError::Unavailable("503".into())));
        generator
            .expect_generate()
            .with(eq("payload"), eq("item"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("summary".into()));

        let out = generate_with_retry(&generator, "payload", "item", &policy(3), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "summary");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|_, _| Err(GeneratorError::Failed("bad output".into())));

        let err = generate_with_retry(&generator, "payload", "item", &policy(3), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::Generation { attempts: 3, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_does_not_retry() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(GeneratorError::Failed("nope".into())));

        let err = generate_with_retry(
            &generator,
            "payload",
            "item",
            &RetryPolicy::no_retry(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SummaryError::Generation { attempts: 1, .. }));
    }

    #[test]
    fn aggregate_template_gets_suffix() {
        let hierarchy = HierarchyConfig::builder()
            .with_type("item", TypeConfig::individual("item", 24))
            .with_type("all_items", TypeConfig::group("item", 24).with_template("items_digest"))
            .build()
            .unwrap();
        let templates = TemplateRegistry::from_hierarchy(&hierarchy);

        assert_eq!(templates.template_for("item", SourceType::RawData).unwrap(), "item");
        assert_eq!(
            templates
                .template_for("all_items", SourceType::ExistingSummaries)
                .unwrap(),
            "items_digest_aggregate"
        );
        assert!(templates.template_for("other", SourceType::RawData).is_err());
    }
}
