use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::{
    api,
    clients::{
        comment_source::{CommentSourceClient, CommentSourceConfig},
        llm::{LlmConfig, LlmSummarizer},
    },
    config::{Config, EmbeddingBackend},
    observability::{Telemetry, tracing::OtelSettings},
    pipeline::{
        embedding::{Embedder, EmbeddingService, HashingEmbedder},
        fetch::HttpCommentSource,
        orchestrator::AnalysisOrchestrator,
    },
    queue::QueueWorker,
    store::{dao::AnalysisDao, postgres::PgAnalysisDao},
    util::retry::RetryConfig,
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    dao: Arc<dyn AnalysisDao>,
    comment_source: Arc<CommentSourceClient>,
    orchestrator: Arc<AnalysisOrchestrator>,
}

impl AppState {
    pub(crate) fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn dao(&self) -> Arc<dyn AnalysisDao> {
        Arc::clone(&self.registry.dao)
    }

    pub(crate) fn comment_source(&self) -> Arc<CommentSourceClient> {
        Arc::clone(&self.registry.comment_source)
    }
}

impl ComponentRegistry {
    /// Wires telemetry, the Postgres store, the HTTP collaborators and the orchestrator.
    ///
    /// # Errors
    /// Fails when telemetry cannot be initialized, the pool cannot be configured, or a
    /// collaborator client cannot be built.
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new(&OtelSettings {
            endpoint: config.otel_exporter_endpoint().map(ToString::to_string),
            sampling_ratio: config.otel_sampling_ratio(),
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .test_before_acquire(true)
            .connect_lazy(config.db_dsn())
            .context("failed to configure analysis db connection pool")?;
        let dao: Arc<dyn AnalysisDao> = Arc::new(PgAnalysisDao::new(pool));

        let retry = RetryConfig {
            max_attempts: config.http_max_retries(),
            base_delay_ms: config.http_backoff_base_ms(),
            max_delay_ms: config.http_backoff_cap_ms(),
        };
        let comment_client = Arc::new(CommentSourceClient::new(CommentSourceConfig {
            base_url: config.comment_source_base_url().to_string(),
            timeout: config.comment_source_timeout(),
            service_token: config
                .comment_source_service_token()
                .map(ToString::to_string),
            retry,
        })?);
        let summarizer = Arc::new(LlmSummarizer::new(LlmConfig {
            base_url: config.llm_base_url().to_string(),
            api_key: config.llm_api_key().map(ToString::to_string),
            model: config.llm_model().to_string(),
            timeout: config.llm_timeout(),
            retry,
        })?);
        let embedder = build_embedder(&config).await?;

        let orchestrator = AnalysisOrchestrator::builder()
            .with_dao(Arc::clone(&dao))
            .with_source(Arc::new(HttpCommentSource::new(
                Arc::clone(&comment_client),
                config.comment_fetch_limit(),
            )))
            .with_embedder(embedder)
            .with_summarizer(summarizer)
            .with_metrics(telemetry.metrics_arc())
            .with_settings(config.clustering())
            .with_policy(config.completeness_policy())
            .build()?;

        Ok(Self {
            config,
            telemetry,
            dao,
            comment_source: comment_client,
            orchestrator: Arc::new(orchestrator),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        config: Config,
        telemetry: Telemetry,
        dao: Arc<dyn AnalysisDao>,
        comment_source: Arc<CommentSourceClient>,
        orchestrator: Arc<AnalysisOrchestrator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            telemetry,
            dao,
            comment_source,
            orchestrator,
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn queue_worker(&self) -> QueueWorker {
        QueueWorker::new(
            Arc::clone(&self.dao),
            Arc::clone(&self.orchestrator),
            self.config.queue_poll_interval(),
        )
    }
}

/// MiniLM when configured and loadable, feature hashing otherwise.
async fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let hashing = || -> Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(config.embedding_hashing_dim())?);
        Ok(embedder)
    };

    match config.embedding_backend() {
        EmbeddingBackend::Hashing => hashing(),
        EmbeddingBackend::MiniLm => {
            let loaded = tokio::task::spawn_blocking(EmbeddingService::new)
                .await
                .context("failed to join embedding model loader")?;
            match loaded {
                Ok(service) => {
                    info!("sentence embedding model loaded");
                    let embedder: Arc<dyn Embedder> = Arc::new(service);
                    Ok(embedder)
                }
                Err(error) => {
                    warn!(
                        error = %format!("{error:#}"),
                        dim = config.embedding_hashing_dim(),
                        "sentence embedding model unavailable, falling back to feature hashing"
                    );
                    hashing()
                }
            }
        }
    }
}

pub fn build_router(registry: Arc<ComponentRegistry>) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
