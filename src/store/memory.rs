//! Process-local store for tests and local runs without Postgres.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::dao::AnalysisDao;
use super::models::{AnalysisItem, ClusterRecord, NewComment, QueuedRun, StoredAnalysis};
use super::types::RunStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub item_id: i64,
    pub status: RunStatus,
    pub status_message: Option<String>,
    pub requested_k: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    items: FxHashMap<i64, AnalysisItem>,
    runs: Vec<RunSnapshot>,
    comments: FxHashMap<i64, Vec<NewComment>>,
    clusters: FxHashMap<i64, Vec<ClusterRecord>>,
}

/// Write counters let tests tell a cache hit (no writes) from a recomputation.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisDao {
    state: Mutex<State>,
    hash_writes: AtomicUsize,
    comment_replacements: AtomicUsize,
    cluster_replacements: AtomicUsize,
    fail_cluster_writes: AtomicBool,
}

impl InMemoryAnalysisDao {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_item(&self, item_id: i64, external_id: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.items.insert(
            item_id,
            AnalysisItem {
                id: item_id,
                external_id: external_id.into(),
                title: None,
                status: RunStatus::Queued,
                status_message: None,
                content_hash: None,
                overall_summary: None,
            },
        );
    }

    /// Queues a run for an existing item and returns its id.
    ///
    /// # Errors
    /// Fails when the item is unknown.
    pub async fn enqueue_run(&self, item_id: i64, requested_k: Option<usize>) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        if !state.items.contains_key(&item_id) {
            bail!("item {item_id} does not exist");
        }
        let run_id = Uuid::now_v7();
        state.runs.push(RunSnapshot {
            run_id,
            item_id,
            status: RunStatus::Queued,
            status_message: None,
            requested_k,
        });
        Ok(run_id)
    }

    pub async fn run(&self, run_id: Uuid) -> Option<RunSnapshot> {
        let state = self.state.lock().await;
        state.runs.iter().find(|run| run.run_id == run_id).cloned()
    }

    pub async fn clusters(&self, item_id: i64) -> Vec<ClusterRecord> {
        let state = self.state.lock().await;
        state.clusters.get(&item_id).cloned().unwrap_or_default()
    }

    pub async fn comments(&self, item_id: i64) -> Vec<NewComment> {
        let state = self.state.lock().await;
        state.comments.get(&item_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn hash_writes(&self) -> usize {
        self.hash_writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn comment_replacements(&self) -> usize {
        self.comment_replacements.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cluster_replacements(&self) -> usize {
        self.cluster_replacements.load(Ordering::SeqCst)
    }

    /// Makes every following `replace_clusters` call fail.
    pub fn fail_cluster_writes(&self, fail: bool) {
        self.fail_cluster_writes.store(fail, Ordering::SeqCst);
    }
}

fn item_mut(state: &mut State, item_id: i64) -> Result<&mut AnalysisItem> {
    state
        .items
        .get_mut(&item_id)
        .ok_or_else(|| anyhow!("item {item_id} does not exist"))
}

#[async_trait]
impl AnalysisDao for InMemoryAnalysisDao {
    async fn load_item(&self, item_id: i64) -> Result<Option<AnalysisItem>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn update_item_status(
        &self,
        item_id: i64,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let item = item_mut(&mut state, item_id)?;
        item.status = status;
        item.status_message = message.map(str::to_string);
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|run| run.run_id == run_id)
            .ok_or_else(|| anyhow!("run {run_id} does not exist"))?;
        run.status = status;
        run.status_message = message.map(str::to_string);
        Ok(())
    }

    async fn update_item_title(&self, item_id: i64, title: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        item_mut(&mut state, item_id)?.title = Some(title.to_string());
        Ok(())
    }

    async fn store_content_hash(&self, item_id: i64, content_hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        item_mut(&mut state, item_id)?.content_hash = Some(content_hash.to_string());
        self.hash_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_analysis(&self, item_id: i64) -> Result<StoredAnalysis> {
        let state = self.state.lock().await;
        let Some(item) = state.items.get(&item_id) else {
            return Ok(StoredAnalysis::default());
        };
        Ok(StoredAnalysis {
            content_hash: item.content_hash.clone(),
            overall_summary: item.overall_summary.clone(),
            clusters: state.clusters.get(&item_id).cloned().unwrap_or_default(),
        })
    }

    async fn replace_comments(&self, item_id: i64, comments: &[NewComment]) -> Result<()> {
        let mut state = self.state.lock().await;
        item_mut(&mut state, item_id)?;
        state.comments.insert(item_id, comments.to_vec());
        self.comment_replacements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_clusters(&self, item_id: i64, clusters: &[ClusterRecord]) -> Result<()> {
        if self.fail_cluster_writes.load(Ordering::SeqCst) {
            bail!("cluster write rejected for item {item_id}");
        }
        let mut state = self.state.lock().await;
        item_mut(&mut state, item_id)?;
        state.clusters.insert(item_id, clusters.to_vec());
        self.cluster_replacements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn store_overall_summary(&self, item_id: i64, summary: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().await;
        item_mut(&mut state, item_id)?.overall_summary = summary.map(str::to_string);
        Ok(())
    }

    async fn claim_next_run(&self) -> Result<Option<QueuedRun>> {
        let mut state = self.state.lock().await;
        let busy: Vec<i64> = state
            .runs
            .iter()
            .filter(|run| run.status == RunStatus::Processing)
            .map(|run| run.item_id)
            .collect();
        let Some(index) = state
            .runs
            .iter()
            .position(|run| run.status == RunStatus::Queued && !busy.contains(&run.item_id))
        else {
            return Ok(None);
        };

        let run = &mut state.runs[index];
        run.status = RunStatus::Processing;
        let (run_id, item_id, requested_k) = (run.run_id, run.item_id, run.requested_k);
        let external_id = state
            .items
            .get(&item_id)
            .map(|item| item.external_id.clone())
            .ok_or_else(|| anyhow!("item {item_id} does not exist"))?;

        Ok(Some(QueuedRun {
            run_id,
            item_id,
            external_id,
            requested_k,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
