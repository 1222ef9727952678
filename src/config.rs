use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::pipeline::cache_gate::CompletenessPolicy;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

/// Which embedding capability the worker constructs at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Sentence-transformers MiniLM through rust-bert.
    MiniLm,
    /// Deterministic feature hashing; no model download.
    Hashing,
}

/// Knobs of the clustering core, grouped so the pipeline can take them by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringSettings {
    pub k_min: usize,
    pub k_max: usize,
    pub min_cluster_size: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub representative_top_k: usize,
    pub representative_min_length: usize,
    pub similarity_threshold: f32,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: 8,
            min_cluster_size: 3,
            seed: 42,
            max_iterations: 300,
            representative_top_k: 5,
            representative_min_length: 8,
            similarity_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    db_dsn: String,
    db_max_connections: u32,
    db_acquire_timeout: Duration,
    comment_source_base_url: String,
    comment_source_service_token: Option<String>,
    comment_source_timeout: Duration,
    comment_fetch_limit: usize,
    llm_base_url: String,
    llm_api_key: Option<String>,
    llm_model: String,
    llm_timeout: Duration,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    embedding_backend: EmbeddingBackend,
    embedding_hashing_dim: usize,
    clustering: ClusteringSettings,
    completeness_policy: CompletenessPolicy,
    queue_poll_interval: Duration,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// Reads and validates the worker configuration from the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when `OPINION_DB_DSN` or `COMMENT_SOURCE_BASE_URL` is unset, or a
    /// value fails to parse or validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_dsn = env_var("OPINION_DB_DSN")?;
        let http_bind = parse_socket_addr("OPINION_WORKER_HTTP_BIND", "0.0.0.0:9010")?;
        let db_max_connections = parse_u32("OPINION_DB_MAX_CONNECTIONS", 10)?;
        let db_acquire_timeout = parse_duration_secs("OPINION_DB_ACQUIRE_TIMEOUT_SECS", 30)?;

        let comment_source_base_url = env_var("COMMENT_SOURCE_BASE_URL")?;
        let comment_source_service_token = env::var("COMMENT_SOURCE_SERVICE_TOKEN").ok();
        let comment_source_timeout = parse_duration_ms("COMMENT_SOURCE_TIMEOUT_MS", 30000)?;
        let comment_fetch_limit = parse_usize("COMMENT_FETCH_LIMIT", 100)?;

        let llm_base_url =
            env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1/".to_string());
        let llm_api_key = env::var("LLM_API_KEY").ok();
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_timeout = parse_duration_secs("LLM_TIMEOUT_SECS", 60)?;

        // Retry settings (exponential backoff + jitter)
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10000)?;

        let embedding_backend = parse_embedding_backend("EMBEDDING_BACKEND", "minilm")?;
        let embedding_hashing_dim = parse_usize("EMBEDDING_HASHING_DIM", 256)?;
        if embedding_hashing_dim == 0 {
            return Err(ConfigError::Invalid {
                name: "EMBEDDING_HASHING_DIM",
                source: anyhow::anyhow!("must be greater than zero"),
            });
        }

        let clustering = parse_clustering_settings()?;
        let completeness_policy = parse_completeness("CACHE_COMPLETENESS", "basic")?;
        let queue_poll_interval = parse_duration_ms("QUEUE_POLL_INTERVAL_MS", 1000)?;

        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_ENDPOINT").ok();
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            http_bind,
            db_dsn,
            db_max_connections,
            db_acquire_timeout,
            comment_source_base_url,
            comment_source_service_token,
            comment_source_timeout,
            comment_fetch_limit,
            llm_base_url,
            llm_api_key,
            llm_model,
            llm_timeout,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            embedding_backend,
            embedding_hashing_dim,
            clustering,
            completeness_policy,
            queue_poll_interval,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn db_dsn(&self) -> &str {
        &self.db_dsn
    }

    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections
    }

    #[must_use]
    pub fn db_acquire_timeout(&self) -> Duration {
        self.db_acquire_timeout
    }

    #[must_use]
    pub fn comment_source_base_url(&self) -> &str {
        &self.comment_source_base_url
    }

    #[must_use]
    pub fn comment_source_service_token(&self) -> Option<&str> {
        self.comment_source_service_token.as_deref()
    }

    #[must_use]
    pub fn comment_source_timeout(&self) -> Duration {
        self.comment_source_timeout
    }

    #[must_use]
    pub fn comment_fetch_limit(&self) -> usize {
        self.comment_fetch_limit
    }

    #[must_use]
    pub fn llm_base_url(&self) -> &str {
        &self.llm_base_url
    }

    #[must_use]
    pub fn llm_api_key(&self) -> Option<&str> {
        self.llm_api_key.as_deref()
    }

    #[must_use]
    pub fn llm_model(&self) -> &str {
        &self.llm_model
    }

    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        self.llm_timeout
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }

    #[must_use]
    pub fn embedding_backend(&self) -> EmbeddingBackend {
        self.embedding_backend
    }

    #[must_use]
    pub fn embedding_hashing_dim(&self) -> usize {
        self.embedding_hashing_dim
    }

    #[must_use]
    pub fn clustering(&self) -> ClusteringSettings {
        self.clustering
    }

    #[must_use]
    pub fn completeness_policy(&self) -> CompletenessPolicy {
        self.completeness_policy
    }

    #[must_use]
    pub fn queue_poll_interval(&self) -> Duration {
        self.queue_poll_interval
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

fn parse_clustering_settings() -> Result<ClusteringSettings, ConfigError> {
    let defaults = ClusteringSettings::default();
    let k_min = parse_usize("CLUSTER_K_MIN", defaults.k_min)?;
    let k_max = parse_usize("CLUSTER_K_MAX", defaults.k_max)?;
    let min_cluster_size = parse_usize("CLUSTER_MIN_SIZE", defaults.min_cluster_size)?;
    let seed = parse_u64("CLUSTER_SEED", defaults.seed)?;
    let max_iterations = parse_usize("CLUSTER_MAX_ITERATIONS", defaults.max_iterations)?;
    let representative_top_k = parse_usize("REPRESENTATIVE_TOP_K", defaults.representative_top_k)?;
    let representative_min_length = parse_usize(
        "REPRESENTATIVE_MIN_LENGTH",
        defaults.representative_min_length,
    )?;
    #[allow(clippy::cast_possible_truncation)]
    let similarity_threshold = parse_f64(
        "REPRESENTATIVE_SIMILARITY_THRESHOLD",
        f64::from(defaults.similarity_threshold),
    )? as f32;

    if k_min < 2 {
        return Err(ConfigError::Invalid {
            name: "CLUSTER_K_MIN",
            source: anyhow::anyhow!("must be at least 2"),
        });
    }
    if k_max < k_min {
        return Err(ConfigError::Invalid {
            name: "CLUSTER_K_MAX",
            source: anyhow::anyhow!("must not be smaller than CLUSTER_K_MIN ({k_min})"),
        });
    }
    if representative_top_k == 0 {
        return Err(ConfigError::Invalid {
            name: "REPRESENTATIVE_TOP_K",
            source: anyhow::anyhow!("must be greater than zero"),
        });
    }
    if representative_min_length == 0 {
        return Err(ConfigError::Invalid {
            name: "REPRESENTATIVE_MIN_LENGTH",
            source: anyhow::anyhow!("must be greater than zero"),
        });
    }
    if !(similarity_threshold > 0.0 && similarity_threshold <= 1.0) {
        return Err(ConfigError::Invalid {
            name: "REPRESENTATIVE_SIMILARITY_THRESHOLD",
            source: anyhow::anyhow!("must be in (0, 1]"),
        });
    }

    Ok(ClusteringSettings {
        k_min,
        k_max,
        min_cluster_size,
        seed,
        max_iterations,
        representative_top_k,
        representative_min_length,
        similarity_threshold,
    })
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<SocketAddr>()
        .map_err(|error| ConfigError::Invalid {
            name,
            source: anyhow::Error::new(error),
        })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_embedding_backend(
    name: &'static str,
    default: &str,
) -> Result<EmbeddingBackend, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.trim().to_lowercase().as_str() {
        "minilm" => Ok(EmbeddingBackend::MiniLm),
        "hashing" => Ok(EmbeddingBackend::Hashing),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("unknown embedding backend: {raw}"),
        }),
    }
}

fn parse_completeness(
    name: &'static str,
    default: &str,
) -> Result<CompletenessPolicy, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    CompletenessPolicy::from_keyword(raw.trim()).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("unknown completeness policy: {raw}"),
    })
}
