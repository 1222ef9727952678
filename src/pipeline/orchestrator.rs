//! Run state machine: `queued -> processing -> done | failed`, mirrored on the run and its item.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::ClusteringSettings;
use crate::observability::metrics::Metrics;
use crate::store::dao::AnalysisDao;
use crate::store::models::{ClusterRecord, NewComment, RepresentativeComment, StoredAnalysis};
use crate::store::types::RunStatus;

use super::analysis::{Analysis, ClusteringCore};
use super::cache_gate::{CacheGate, CompletenessPolicy};
use super::cluster_count::KSource;
use super::embedding::Embedder;
use super::fetch::{CommentSource, FetchedItem, RawComment};
use super::preprocess::{CleanCorpus, TextPreprocessor};
use super::summarizer::{ClusterOverview, DigestStage, SummarizationService};

/// Fewer raw or clean comments than this skip clustering.
pub const MIN_COMMENTS: usize = 3;

const ANONYMOUS_AUTHOR: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub run_id: Uuid,
    pub item_id: i64,
    pub external_id: String,
    /// Skips the k search when set.
    pub requested_k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientData {
    RawComments { count: usize },
    CleanComments { count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzedSummary {
    pub raw_comments: usize,
    pub clean_comments: usize,
    pub k: usize,
    pub k_source: KSource,
    /// Embedding backend behind this analysis, e.g. `hashing` after a model load failure.
    pub embedder: &'static str,
}

/// How a run that reached `done` got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    CacheHit,
    Insufficient(InsufficientData),
    Analyzed(AnalyzedSummary),
}

impl RunOutcome {
    /// Status message stored next to `done`.
    #[must_use]
    pub fn note(&self) -> Option<String> {
        match self {
            Self::CacheHit => Some("Comments unchanged; previous analysis reused".to_string()),
            Self::Insufficient(InsufficientData::RawComments { count }) => Some(format!(
                "Not enough comments to analyze ({count} found, at least {MIN_COMMENTS} required)"
            )),
            Self::Insufficient(InsufficientData::CleanComments { count }) => Some(format!(
                "Not enough valid comments after preprocessing ({count} remaining, at least {MIN_COMMENTS} required)"
            )),
            Self::Analyzed(_) => None,
        }
    }
}

pub struct AnalysisOrchestrator {
    dao: Arc<dyn AnalysisDao>,
    source: Arc<dyn CommentSource>,
    embedder: Arc<dyn Embedder>,
    digests: DigestStage,
    metrics: Arc<Metrics>,
    preprocessor: TextPreprocessor,
    core: ClusteringCore,
    gate: CacheGate,
}

impl AnalysisOrchestrator {
    #[must_use]
    pub fn builder() -> AnalysisOrchestratorBuilder {
        AnalysisOrchestratorBuilder::default()
    }

    /// Executes one run and records its terminal state.
    ///
    /// # Errors
    /// Any failure outside summarization marks the run and item `failed` with the error chain
    /// as message, then is returned to the caller.
    #[instrument(skip_all, fields(run_id = %request.run_id, item_id = request.item_id))]
    pub async fn run(&self, request: &AnalysisRequest) -> Result<RunOutcome> {
        let started = Instant::now();
        self.metrics.runs_started.inc();
        self.metrics.active_runs.inc();

        let result = match self.execute(request).await {
            Ok(outcome) => self
                .dao
                .transition(
                    request.run_id,
                    request.item_id,
                    RunStatus::Done,
                    outcome.note().as_deref(),
                )
                .await
                .context("failed to mark run done")
                .map(|()| outcome),
            Err(error) => Err(error),
        };

        match &result {
            Ok(outcome) => {
                self.metrics.runs_completed.inc();
                info!(outcome = ?outcome, "analysis run finished");
            }
            Err(run_error) => {
                self.metrics.runs_failed.inc();
                let message = format!("{run_error:#}");
                error!(error = %message, "analysis run failed");
                if let Err(mark_error) = self
                    .dao
                    .transition(
                        request.run_id,
                        request.item_id,
                        RunStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!(error = %format!("{mark_error:#}"), "failed to mark run failed");
                }
            }
        }

        self.metrics.active_runs.dec();
        self.metrics
            .run_duration
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn execute(&self, request: &AnalysisRequest) -> Result<RunOutcome> {
        self.dao
            .transition(
                request.run_id,
                request.item_id,
                RunStatus::Processing,
                None,
            )
            .await
            .context("failed to mark run processing")?;

        let fetched = self
            .source
            .fetch(&request.external_id)
            .await
            .with_context(|| format!("failed to fetch comments for {}", request.external_id))?;
        let raw_count = fetched.comments.len();
        self.metrics.comments_fetched.inc_by(as_count(raw_count));

        if let Some(title) = fetched.title.as_deref() {
            self.dao
                .update_item_title(request.item_id, title)
                .await
                .context("failed to store item title")?;
        }

        let prior = self
            .dao
            .load_analysis(request.item_id)
            .await
            .context("failed to load prior analysis")?;
        let ids: Vec<&str> = fetched.comments.iter().map(|c| c.id.as_str()).collect();
        let snapshot = self.gate.evaluate(&ids, &prior);
        if snapshot.is_hit() {
            self.metrics.cache_hits.inc();
            info!(raw_comments = raw_count, "comments unchanged, reusing analysis");
            return Ok(RunOutcome::CacheHit);
        }
        info!(
            raw_comments = raw_count,
            decision = ?snapshot.decision,
            "recomputing analysis"
        );

        if has_results(&prior) {
            self.clear_results(request.item_id).await?;
        }
        self.dao
            .store_content_hash(request.item_id, &snapshot.content_hash)
            .await
            .context("failed to store content hash")?;
        self.dao
            .replace_comments(request.item_id, &new_comments(&fetched.comments))
            .await
            .context("failed to replace comments")?;

        if raw_count < MIN_COMMENTS {
            self.metrics.insufficient_data.inc();
            return Ok(RunOutcome::Insufficient(InsufficientData::RawComments {
                count: raw_count,
            }));
        }

        let corpus = self
            .preprocessor
            .process(&fetched.comments.iter().map(|c| c.text.as_str()).collect::<Vec<_>>());
        self.metrics
            .comments_dropped
            .inc_by(as_count(raw_count - corpus.len()));
        if corpus.len() < MIN_COMMENTS {
            self.metrics.insufficient_data.inc();
            return Ok(RunOutcome::Insufficient(InsufficientData::CleanComments {
                count: corpus.len(),
            }));
        }

        let embeddings = self.embed(&corpus).await?;
        let (analysis, corpus) = self
            .cluster(corpus, embeddings, request.requested_k)
            .await?;

        let records = self.digest(&analysis, &corpus, &fetched).await;
        self.dao
            .replace_clusters(request.item_id, &records)
            .await
            .context("failed to replace clusters")?;
        self.metrics.clusters_created.inc_by(as_count(records.len()));

        let overviews: Vec<ClusterOverview> = records
            .iter()
            .map(|r| ClusterOverview {
                label: r.label.clone(),
                summary: r.summary.clone(),
                size: r.size,
                stance: r.stance.unwrap_or_default(),
            })
            .collect();
        let overall = self.digests.overall(&overviews, fetched.title.as_deref()).await;
        self.dao
            .store_overall_summary(request.item_id, overall.as_deref())
            .await
            .context("failed to store overall summary")?;

        let embedder = self.embedder.name();
        self.metrics
            .analyses_by_embedder
            .with_label_values(&[embedder])
            .inc();
        Ok(RunOutcome::Analyzed(AnalyzedSummary {
            raw_comments: raw_count,
            clean_comments: corpus.len(),
            k: analysis.selection.k,
            k_source: analysis.selection.source,
            embedder,
        }))
    }

    async fn clear_results(&self, item_id: i64) -> Result<()> {
        self.dao
            .replace_clusters(item_id, &[])
            .await
            .context("failed to clear stale clusters")?;
        self.dao
            .store_overall_summary(item_id, None)
            .await
            .context("failed to clear stale overall summary")
    }

    async fn embed(&self, corpus: &CleanCorpus) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();
        let embeddings = self
            .embedder
            .embed(&corpus.texts)
            .await
            .with_context(|| format!("{} embedder failed", self.embedder.name()))?;
        self.metrics
            .embedding_duration
            .observe(started.elapsed().as_secs_f64());

        ensure!(
            embeddings.len() == corpus.len(),
            "embedder returned {} vectors for {} texts",
            embeddings.len(),
            corpus.len()
        );
        Ok(embeddings)
    }

    async fn cluster(
        &self,
        corpus: CleanCorpus,
        embeddings: Vec<Vec<f32>>,
        requested_k: Option<usize>,
    ) -> Result<(Analysis, CleanCorpus)> {
        let started = Instant::now();
        let core = self.core;
        let (analysis, corpus) = tokio::task::spawn_blocking(move || {
            core.analyze(&corpus.texts, &embeddings, requested_k)
                .map(|analysis| (analysis, corpus))
        })
        .await
        .context("clustering task panicked")?
        .context("clustering failed")?;
        self.metrics
            .clustering_duration
            .observe(started.elapsed().as_secs_f64());

        self.metrics
            .k_candidates_rejected
            .inc_by(as_count(analysis.selection.rejected_count()));
        info!(
            clean_comments = corpus.len(),
            k = analysis.selection.k,
            source = ?analysis.selection.source,
            rejected = analysis.selection.rejected_count(),
            "clustered comments"
        );
        Ok((analysis, corpus))
    }

    async fn digest(
        &self,
        analysis: &Analysis,
        corpus: &CleanCorpus,
        fetched: &FetchedItem,
    ) -> Vec<ClusterRecord> {
        let started = Instant::now();
        let title = fetched.title.as_deref();
        let mut records = Vec::with_capacity(analysis.clusters.len());

        for cluster in &analysis.clusters {
            let texts: Vec<String> = cluster
                .representative_indices
                .iter()
                .map(|&i| corpus.texts[i].clone())
                .collect();
            let digest = self.digests.digest_cluster(cluster.id, &texts, title).await;

            let representatives = cluster
                .representative_indices
                .iter()
                .map(|&i| RepresentativeComment {
                    author: fetched.comments[corpus.original_indices[i]]
                        .author
                        .clone()
                        .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
                    text: corpus.texts[i].clone(),
                })
                .collect();

            records.push(ClusterRecord {
                ordinal: cluster.id,
                label: digest.label,
                summary: digest.summary,
                stance: Some(digest.stance),
                size: cluster.size,
                ord_x: cluster.coord[0],
                ord_y: cluster.coord[1],
                representatives,
            });
        }

        self.metrics
            .summary_duration
            .observe(started.elapsed().as_secs_f64());
        records
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_count(n: usize) -> f64 {
    n as f64
}

fn has_results(prior: &StoredAnalysis) -> bool {
    !prior.clusters.is_empty() || prior.overall_summary.is_some()
}

fn new_comments(comments: &[RawComment]) -> Vec<NewComment> {
    comments
        .iter()
        .map(|c| NewComment {
            comment_id: c.id.clone(),
            text: c.text.clone(),
            like_count: i64::try_from(c.like_count).unwrap_or(i64::MAX),
            author: c.author.clone(),
        })
        .collect()
}

/// Collects the collaborators of an [`AnalysisOrchestrator`]; clustering settings and the
/// completeness policy fall back to their defaults.
#[derive(Default)]
pub struct AnalysisOrchestratorBuilder {
    dao: Option<Arc<dyn AnalysisDao>>,
    source: Option<Arc<dyn CommentSource>>,
    embedder: Option<Arc<dyn Embedder>>,
    summarizer: Option<Arc<dyn SummarizationService>>,
    metrics: Option<Arc<Metrics>>,
    settings: ClusteringSettings,
    policy: CompletenessPolicy,
}

impl AnalysisOrchestratorBuilder {
    #[must_use]
    pub fn with_dao(mut self, dao: Arc<dyn AnalysisDao>) -> Self {
        self.dao = Some(dao);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn CommentSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn SummarizationService>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ClusteringSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CompletenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// # Errors
    /// Fails when a collaborator was not configured.
    pub fn build(self) -> Result<AnalysisOrchestrator> {
        let metrics = self.metrics.context("metrics must be configured")?;
        let summarizer = self.summarizer.context("summarizer must be configured")?;
        Ok(AnalysisOrchestrator {
            dao: self.dao.context("dao must be configured")?,
            source: self.source.context("comment source must be configured")?,
            embedder: self.embedder.context("embedder must be configured")?,
            digests: DigestStage::new(summarizer, Arc::clone(&metrics)),
            metrics,
            preprocessor: TextPreprocessor::default(),
            core: ClusteringCore::new(&self.settings),
            gate: CacheGate::new(self.policy),
        })
    }
}
