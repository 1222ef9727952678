/// Prometheus metric definitions for the analysis worker.
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, Registry, register_counter_vec_with_registry,
    register_counter_with_registry, register_gauge_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Metrics {
    // counters
    pub runs_started: Counter,
    pub runs_completed: Counter,
    pub runs_failed: Counter,
    pub cache_hits: Counter,
    pub insufficient_data: Counter,
    pub comments_fetched: Counter,
    pub comments_dropped: Counter,
    pub clusters_created: Counter,
    pub k_candidates_rejected: Counter,
    pub summary_fallbacks: Counter,
    /// Completed analyses labeled by the embedding backend that produced them.
    pub analyses_by_embedder: CounterVec,

    // histograms
    pub embedding_duration: Histogram,
    pub clustering_duration: Histogram,
    pub summary_duration: Histogram,
    pub run_duration: Histogram,

    // gauges
    pub active_runs: Gauge,
}

impl Metrics {
    /// Registers every metric on `registry`.
    ///
    /// # Errors
    /// Fails when a metric with the same name is already registered on `registry`.
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            runs_started: register_counter_with_registry!(
                "opinion_runs_started_total",
                "Total number of analysis runs started",
                registry
            )?,
            runs_completed: register_counter_with_registry!(
                "opinion_runs_completed_total",
                "Total number of analysis runs finished as done",
                registry
            )?,
            runs_failed: register_counter_with_registry!(
                "opinion_runs_failed_total",
                "Total number of analysis runs finished as failed",
                registry
            )?,
            cache_hits: register_counter_with_registry!(
                "opinion_cache_hits_total",
                "Total number of runs served from a complete prior analysis",
                registry
            )?,
            insufficient_data: register_counter_with_registry!(
                "opinion_insufficient_data_total",
                "Total number of runs short-circuited for lack of comments",
                registry
            )?,
            comments_fetched: register_counter_with_registry!(
                "opinion_comments_fetched_total",
                "Total number of raw comments fetched",
                registry
            )?,
            comments_dropped: register_counter_with_registry!(
                "opinion_comments_dropped_total",
                "Total number of comments dropped by preprocessing",
                registry
            )?,
            clusters_created: register_counter_with_registry!(
                "opinion_clusters_created_total",
                "Total number of clusters persisted",
                registry
            )?,
            k_candidates_rejected: register_counter_with_registry!(
                "opinion_k_candidates_rejected_total",
                "Total number of cluster-count candidates rejected during search",
                registry
            )?,
            summary_fallbacks: register_counter_with_registry!(
                "opinion_summary_fallbacks_total",
                "Total number of cluster digests replaced by the fixed fallback",
                registry
            )?,
            analyses_by_embedder: register_counter_vec_with_registry!(
                "opinion_analyses_total",
                "Total number of full analyses persisted, by embedding backend",
                &["embedder"],
                registry
            )?,
            embedding_duration: register_histogram_with_registry!(
                "opinion_embedding_duration_seconds",
                "Duration of embedding calls",
                registry
            )?,
            clustering_duration: register_histogram_with_registry!(
                "opinion_clustering_duration_seconds",
                "Duration of k search, partitioning, projection and representative selection",
                registry
            )?,
            summary_duration: register_histogram_with_registry!(
                "opinion_summary_duration_seconds",
                "Duration of cluster and overall summarization",
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                "opinion_run_duration_seconds",
                "Duration of whole analysis runs",
                registry
            )?,
            active_runs: register_gauge_with_registry!(
                "opinion_active_runs",
                "Number of analysis runs currently executing",
                registry
            )?,
        })
    }
}
