//! Persistence boundary of the analysis worker.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{AnalysisItem, ClusterRecord, NewComment, QueuedRun, StoredAnalysis};
use super::types::RunStatus;

/// Item, run, comment and cluster storage used by the orchestrator and the queue worker.
///
/// `replace_*` are snapshot replacements: every previous row of that kind for the item is
/// deleted before the new rows are inserted, never merged.
#[async_trait]
pub trait AnalysisDao: Send + Sync {
    async fn load_item(&self, item_id: i64) -> Result<Option<AnalysisItem>>;

    async fn update_item_status(
        &self,
        item_id: i64,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()>;

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()>;

    /// Moves the run and its item to `status` together.
    async fn transition(
        &self,
        run_id: Uuid,
        item_id: i64,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        self.update_run_status(run_id, status, message).await?;
        self.update_item_status(item_id, status, message).await
    }

    async fn update_item_title(&self, item_id: i64, title: &str) -> Result<()>;

    async fn store_content_hash(&self, item_id: i64, content_hash: &str) -> Result<()>;

    async fn load_analysis(&self, item_id: i64) -> Result<StoredAnalysis>;

    async fn replace_comments(&self, item_id: i64, comments: &[NewComment]) -> Result<()>;

    async fn replace_clusters(&self, item_id: i64, clusters: &[ClusterRecord]) -> Result<()>;

    async fn store_overall_summary(&self, item_id: i64, summary: Option<&str>) -> Result<()>;

    /// Claims the oldest queued run whose item has no run in progress and marks it `processing`.
    async fn claim_next_run(&self) -> Result<Option<QueuedRun>>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;
}
