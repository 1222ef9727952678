pub(crate) mod health;
pub(crate) mod metrics;

use axum::{Router, routing::get};

use crate::app::AppState;

/// Operational surface only: probes and the metrics scrape.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .with_state(state)
}
