use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::observability::metrics::Metrics;
pub use crate::store::types::Stance;

/// Representatives beyond this many are never sent for labeling.
pub const MAX_REPRESENTATIVES: usize = 5;

pub const FALLBACK_LABEL: &str = "Topic (generation failed)";
pub const FALLBACK_SUMMARY: &str = "Summary generation failed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDigest {
    pub label: String,
    pub summary: String,
    pub stance: Stance,
}

impl ClusterDigest {
    /// Substituted when labeling fails.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            label: FALLBACK_LABEL.to_string(),
            summary: FALLBACK_SUMMARY.to_string(),
            stance: Stance::Neutral,
        }
    }

    /// Digest of a cluster without representatives; `number` is 1-based.
    #[must_use]
    pub fn placeholder(number: usize) -> Self {
        Self {
            label: format!("Group {number}"),
            summary: "No content".to_string(),
            stance: Stance::Neutral,
        }
    }
}

/// Per-cluster input to the item-level summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOverview {
    pub label: String,
    pub summary: String,
    pub size: usize,
    pub stance: Stance,
}

/// Natural-language labeling of clusters and of the whole item.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    async fn summarize_cluster(
        &self,
        representatives: &[String],
        title: Option<&str>,
    ) -> Result<ClusterDigest>;

    async fn summarize_overall(
        &self,
        clusters: &[ClusterOverview],
        title: Option<&str>,
    ) -> Result<Option<String>>;
}

/// Wraps a [`SummarizationService`] so that its failures never reach the pipeline.
#[derive(Clone)]
pub struct DigestStage {
    service: Arc<dyn SummarizationService>,
    metrics: Arc<Metrics>,
}

impl DigestStage {
    pub fn new(service: Arc<dyn SummarizationService>, metrics: Arc<Metrics>) -> Self {
        Self { service, metrics }
    }

    /// `ordinal` is the 0-based cluster id.
    pub async fn digest_cluster(
        &self,
        ordinal: usize,
        representatives: &[String],
        title: Option<&str>,
    ) -> ClusterDigest {
        if representatives.is_empty() {
            return ClusterDigest::placeholder(ordinal + 1);
        }
        let limit = representatives.len().min(MAX_REPRESENTATIVES);

        match self
            .service
            .summarize_cluster(&representatives[..limit], title)
            .await
        {
            Ok(mut digest) => {
                if digest.label.trim().is_empty() {
                    digest.label = FALLBACK_LABEL.to_string();
                }
                if digest.summary.trim().is_empty() {
                    digest.summary = FALLBACK_SUMMARY.to_string();
                }
                digest
            }
            Err(error) => {
                warn!(
                    cluster = ordinal,
                    error = %format!("{error:#}"),
                    "cluster summarization failed, using fallback"
                );
                self.metrics.summary_fallbacks.inc();
                ClusterDigest::fallback()
            }
        }
    }

    pub async fn overall(
        &self,
        clusters: &[ClusterOverview],
        title: Option<&str>,
    ) -> Option<String> {
        if clusters.is_empty() {
            return None;
        }
        match self.service.summarize_overall(clusters, title).await {
            Ok(summary) => summary.filter(|s| !s.trim().is_empty()),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "overall summarization failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use prometheus::Registry;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<usize>>,
        fail: bool,
        blank: bool,
    }

    #[async_trait]
    impl SummarizationService for Recording {
        async fn summarize_cluster(
            &self,
            representatives: &[String],
            _title: Option<&str>,
        ) -> Result<ClusterDigest> {
            self.seen.lock().expect("lock").push(representatives.len());
            if self.fail {
                bail!("upstream unavailable");
            }
            Ok(ClusterDigest {
                label: if self.blank { " ".into() } else { "Battery".into() },
                summary: "Viewers complain about battery life.".into(),
                stance: Stance::Skeptic,
            })
        }

        async fn summarize_overall(
            &self,
            _clusters: &[ClusterOverview],
            _title: Option<&str>,
        ) -> Result<Option<String>> {
            if self.fail {
                bail!("upstream unavailable");
            }
            Ok(Some("Mostly about the battery.".into()))
        }
    }

    fn stage(service: Recording) -> (DigestStage, Arc<Recording>, Arc<Metrics>) {
        let service = Arc::new(service);
        let metrics = Arc::new(Metrics::new(Arc::new(Registry::new())).expect("metrics"));
        (
            DigestStage::new(service.clone(), Arc::clone(&metrics)),
            service,
            metrics,
        )
    }

    fn reps(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("representative {i}")).collect()
    }

    #[tokio::test]
    async fn sends_at_most_five_representatives() {
        let (stage, service, _) = stage(Recording::default());

        let digest = stage.digest_cluster(0, &reps(8), Some("title")).await;

        assert_eq!(digest.label, "Battery");
        assert_eq!(*service.seen.lock().expect("lock"), vec![5]);
    }

    #[tokio::test]
    async fn empty_cluster_gets_placeholder_without_calling_service() {
        let (stage, service, _) = stage(Recording::default());

        let digest = stage.digest_cluster(2, &[], None).await;

        assert_eq!(digest, ClusterDigest::placeholder(3));
        assert_eq!(digest.label, "Group 3");
        assert!(service.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn failures_degrade_to_fallback_and_are_counted() {
        let (stage, _, metrics) = stage(Recording {
            fail: true,
            ..Recording::default()
        });

        let digest = stage.digest_cluster(0, &reps(3), None).await;
        let overall = stage
            .overall(
                &[ClusterOverview {
                    label: "A".into(),
                    summary: "B".into(),
                    size: 3,
                    stance: Stance::Neutral,
                }],
                None,
            )
            .await;

        assert_eq!(digest, ClusterDigest::fallback());
        assert!(overall.is_none());
        assert!((metrics.summary_fallbacks.get() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn blank_label_is_replaced() {
        let (stage, _, _) = stage(Recording {
            blank: true,
            ..Recording::default()
        });

        let digest = stage.digest_cluster(0, &reps(2), None).await;

        assert_eq!(digest.label, FALLBACK_LABEL);
        assert_eq!(digest.stance, Stance::Skeptic);
    }

    #[tokio::test]
    async fn overall_of_no_clusters_is_none() {
        let (stage, _, _) = stage(Recording::default());
        assert!(stage.overall(&[], None).await.is_none());
    }
}
