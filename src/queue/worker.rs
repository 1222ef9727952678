use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::pipeline::orchestrator::{AnalysisOrchestrator, AnalysisRequest};
use crate::store::dao::AnalysisDao;

/// Claims queued runs one at a time and drives them through the orchestrator.
pub struct QueueWorker {
    dao: Arc<dyn AnalysisDao>,
    orchestrator: Arc<AnalysisOrchestrator>,
    poll_interval: Duration,
}

impl QueueWorker {
    #[must_use]
    pub fn new(
        dao: Arc<dyn AnalysisDao>,
        orchestrator: Arc<AnalysisOrchestrator>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dao,
            orchestrator,
            poll_interval,
        }
    }

    /// Runs until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "starting analysis queue worker"
        );

        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "failed to claim next run");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("analysis queue worker stopped");
    }

    /// Claims and executes at most one run. Returns whether a run was claimed.
    ///
    /// A failed run is logged, not returned: it has already been recorded as `failed`.
    ///
    /// # Errors
    /// Fails only when the store cannot be queried for work.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(queued) = self.dao.claim_next_run().await? else {
            debug!("no queued runs");
            return Ok(false);
        };

        let request = AnalysisRequest {
            run_id: queued.run_id,
            item_id: queued.item_id,
            external_id: queued.external_id,
            requested_k: queued.requested_k,
        };
        info!(
            run_id = %request.run_id,
            item_id = request.item_id,
            requested_k = ?request.requested_k,
            "claimed analysis run"
        );

        if let Err(e) = self.orchestrator.run(&request).await {
            error!(
                run_id = %request.run_id,
                item_id = request.item_id,
                error = %format!("{e:#}"),
                "analysis run failed"
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use async_trait::async_trait;
    use prometheus::Registry;

    use super::*;
    use crate::observability::metrics::Metrics;
    use crate::pipeline::embedding::HashingEmbedder;
    use crate::pipeline::fetch::{CommentSource, FetchedItem, RawComment};
    use crate::pipeline::summarizer::{
        ClusterDigest, ClusterOverview, Stance, SummarizationService,
    };
    use crate::store::memory::InMemoryAnalysisDao;
    use crate::store::types::RunStatus;

    struct FixedSource(Vec<&'static str>);

    #[async_trait]
    impl CommentSource for FixedSource {
        async fn fetch(&self, external_id: &str) -> Result<FetchedItem> {
            if external_id == "broken" {
                bail!("source offline");
            }
            Ok(FetchedItem {
                title: None,
                comments: self
                    .0
                    .iter()
                    .enumerate()
                    .map(|(i, text)| RawComment {
                        id: format!("c{i}"),
                        text: (*text).to_string(),
                        like_count: 0,
                        author: None,
                    })
                    .collect(),
            })
        }
    }

    struct Echo;

    #[async_trait]
    impl SummarizationService for Echo {
        async fn summarize_cluster(
            &self,
            representatives: &[String],
            _title: Option<&str>,
        ) -> Result<ClusterDigest> {
            Ok(ClusterDigest {
                label: "Echo".into(),
                summary: representatives.join(" / "),
                stance: Stance::Neutral,
            })
        }

        async fn summarize_overall(
            &self,
            _clusters: &[ClusterOverview],
            _title: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn worker(dao: Arc<InMemoryAnalysisDao>, comments: Vec<&'static str>) -> QueueWorker {
        let orchestrator = AnalysisOrchestrator::builder()
            .with_dao(dao.clone())
            .with_source(Arc::new(FixedSource(comments)))
            .with_embedder(Arc::new(HashingEmbedder::new(64).expect("embedder")))
            .with_summarizer(Arc::new(Echo))
            .with_metrics(Arc::new(
                Metrics::new(Arc::new(Registry::new())).expect("metrics"),
            ))
            .build()
            .expect("orchestrator");
        QueueWorker::new(dao, Arc::new(orchestrator), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn run_once_reports_empty_queue() {
        let dao = Arc::new(InMemoryAnalysisDao::new());
        let worker = worker(dao, vec![]);

        assert!(!worker.run_once().await.expect("claim works"));
    }

    #[tokio::test]
    async fn run_once_drives_a_run_to_done() {
        let dao = Arc::new(InMemoryAnalysisDao::new());
        dao.insert_item(1, "video-1").await;
        let run_id = dao.enqueue_run(1, None).await.expect("enqueue");
        let worker = worker(Arc::clone(&dao), vec!["only one comment here"]);

        assert!(worker.run_once().await.expect("claim works"));

        let run = dao.run(run_id).await.expect("run exists");
        assert_eq!(run.status, RunStatus::Done);
        assert!(run.status_message.is_some());
    }

    #[tokio::test]
    async fn failed_runs_do_not_stop_the_worker() {
        let dao = Arc::new(InMemoryAnalysisDao::new());
        dao.insert_item(1, "broken").await;
        dao.insert_item(2, "video-2").await;
        let failing = dao.enqueue_run(1, None).await.expect("enqueue");
        let passing = dao.enqueue_run(2, None).await.expect("enqueue");
        let worker = worker(Arc::clone(&dao), vec![]);

        assert!(worker.run_once().await.expect("claim works"));
        assert!(worker.run_once().await.expect("claim works"));

        let failed = dao.run(failing).await.expect("run exists");
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(
            failed
                .status_message
                .as_deref()
                .is_some_and(|m| m.contains("source offline"))
        );
        assert_eq!(
            dao.run(passing).await.expect("run exists").status,
            RunStatus::Done
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dao = Arc::new(InMemoryAnalysisDao::new());
        let worker = Arc::new(worker(dao, vec![]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).expect("worker listening");

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker stops in time")
            .expect("worker task completes");
    }
}
