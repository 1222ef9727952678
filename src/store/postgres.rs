use std::fmt::Display;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::dao::AnalysisDao;
use super::models::{
    AnalysisItem, ClusterRecord, NewComment, QueuedRun, RepresentativeComment, StoredAnalysis,
};
use super::types::{RunStatus, Stance};

/// sqlx implementation over the tables in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgAnalysisDao {
    pool: PgPool,
}

impl PgAnalysisDao {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(value: usize, what: &'static str) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("{what} {value} does not fit in INTEGER"))
}

/// Fails when an UPDATE matched no row.
fn ensure_affected(rows: u64, what: &str, id: impl Display) -> Result<()> {
    ensure!(rows > 0, "{what} {id} does not exist");
    Ok(())
}

#[async_trait]
impl AnalysisDao for PgAnalysisDao {
    async fn load_item(&self, item_id: i64) -> Result<Option<AnalysisItem>> {
        let row = sqlx::query(
            r"
            SELECT id, external_id, title, status, status_message, content_hash, overall_summary
            FROM analysis_items
            WHERE id = $1
            ",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load analysis item")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.try_get("status")?;
        let status = RunStatus::parse(&status_str)
            .with_context(|| format!("unknown item status {status_str}"))?;

        Ok(Some(AnalysisItem {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            status,
            status_message: row.try_get("status_message")?,
            content_hash: row.try_get("content_hash")?,
            overall_summary: row.try_get("overall_summary")?,
        }))
    }

    async fn update_item_status(
        &self,
        item_id: i64,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE analysis_items
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(item_id)
        .bind(status)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to update item status")?;
        ensure_affected(updated.rows_affected(), "item", item_id)?;
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE analysis_runs
            SET status = $2,
                status_message = $3,
                started_at = CASE WHEN $2 = 'processing' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                finished_at = CASE WHEN $2 IN ('done', 'failed') THEN NOW() ELSE finished_at END
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .bind(status)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to update run status")?;
        ensure_affected(updated.rows_affected(), "run", run_id)?;
        Ok(())
    }

    async fn transition(
        &self,
        run_id: Uuid,
        item_id: i64,
        status: RunStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let updated = sqlx::query(
            r"
            UPDATE analysis_runs
            SET status = $2,
                status_message = $3,
                started_at = CASE WHEN $2 = 'processing' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                finished_at = CASE WHEN $2 IN ('done', 'failed') THEN NOW() ELSE finished_at END
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .bind(status)
        .bind(message)
        .execute(&mut *tx)
        .await
        .context("failed to update run status")?;
        ensure_affected(updated.rows_affected(), "run", run_id)?;

        let updated = sqlx::query(
            r"
            UPDATE analysis_items
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(item_id)
        .bind(status)
        .bind(message)
        .execute(&mut *tx)
        .await
        .context("failed to update item status")?;
        ensure_affected(updated.rows_affected(), "item", item_id)?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }

    async fn update_item_title(&self, item_id: i64, title: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE analysis_items SET title = $2, updated_at = NOW() WHERE id = $1")
                .bind(item_id)
                .bind(title)
                .execute(&self.pool)
                .await
                .context("failed to update item title")?;
        ensure_affected(updated.rows_affected(), "item", item_id)?;
        Ok(())
    }

    async fn store_content_hash(&self, item_id: i64, content_hash: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE analysis_items SET content_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(item_id)
        .bind(content_hash)
        .execute(&self.pool)
        .await
        .context("failed to store content hash")?;
        ensure_affected(updated.rows_affected(), "item", item_id)?;
        Ok(())
    }

    async fn load_analysis(&self, item_id: i64) -> Result<StoredAnalysis> {
        let item = sqlx::query(
            "SELECT content_hash, overall_summary FROM analysis_items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load stored analysis")?;

        let Some(item) = item else {
            return Ok(StoredAnalysis::default());
        };

        let rows = sqlx::query(
            r"
            SELECT ordinal, label, summary, stance, size, ord_x, ord_y, rep_comments_json
            FROM analysis_clusters
            WHERE item_id = $1
            ORDER BY ordinal ASC
            ",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load stored clusters")?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in rows {
            let ordinal: i32 = row.try_get("ordinal")?;
            let size: i32 = row.try_get("size")?;
            let stance: Option<String> = row.try_get("stance")?;
            let reps: serde_json::Value = row.try_get("rep_comments_json")?;
            let representatives: Vec<RepresentativeComment> =
                serde_json::from_value(reps).context("malformed rep_comments_json")?;
            clusters.push(ClusterRecord {
                ordinal: usize::try_from(ordinal).context("negative cluster ordinal")?,
                label: row.try_get("label")?,
                summary: row.try_get("summary")?,
                stance: stance.as_deref().and_then(Stance::parse),
                size: usize::try_from(size).context("negative cluster size")?,
                ord_x: row.try_get("ord_x")?,
                ord_y: row.try_get("ord_y")?,
                representatives,
            });
        }

        Ok(StoredAnalysis {
            content_hash: item.try_get("content_hash")?,
            overall_summary: item.try_get("overall_summary")?,
            clusters,
        })
    }

    async fn replace_comments(&self, item_id: i64, comments: &[NewComment]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query("DELETE FROM analysis_comments WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete previous comments")?;

        for comment in comments {
            sqlx::query(
                r"
                INSERT INTO analysis_comments (item_id, comment_id, text, like_count, author)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(item_id)
            .bind(&comment.comment_id)
            .bind(&comment.text)
            .bind(comment.like_count)
            .bind(comment.author.as_deref())
            .execute(&mut *tx)
            .await
            .context("failed to insert comment")?;
        }

        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }

    async fn replace_clusters(&self, item_id: i64, clusters: &[ClusterRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query("DELETE FROM analysis_clusters WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete previous clusters")?;

        for cluster in clusters {
            let reps = serde_json::to_value(&cluster.representatives)
                .context("failed to encode representative comments")?;
            sqlx::query(
                r"
                INSERT INTO analysis_clusters
                    (item_id, ordinal, label, summary, stance, size, ord_x, ord_y, rep_comments_json)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(item_id)
            .bind(to_i32(cluster.ordinal, "cluster ordinal")?)
            .bind(&cluster.label)
            .bind(&cluster.summary)
            .bind(cluster.stance)
            .bind(to_i32(cluster.size, "cluster size")?)
            .bind(cluster.ord_x)
            .bind(cluster.ord_y)
            .bind(reps)
            .execute(&mut *tx)
            .await
            .context("failed to insert cluster")?;
        }

        tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }

    async fn store_overall_summary(&self, item_id: i64, summary: Option<&str>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE analysis_items SET overall_summary = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(item_id)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("failed to store overall summary")?;
        ensure_affected(updated.rows_affected(), "item", item_id)?;
        Ok(())
    }

    async fn claim_next_run(&self) -> Result<Option<QueuedRun>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let row = sqlx::query(
            r"
            SELECT r.run_id, r.item_id, r.requested_k, i.external_id
            FROM analysis_runs r
            JOIN analysis_items i ON i.id = r.item_id
            WHERE r.status = 'queued'
              AND NOT EXISTS (
                  SELECT 1 FROM analysis_runs busy
                  WHERE busy.item_id = r.item_id AND busy.status = 'processing'
              )
            ORDER BY r.created_at ASC
            FOR UPDATE OF r SKIP LOCKED
            LIMIT 1
            ",
        )
        .fetch_optional(&mut *tx)
        .await
        .context("failed to pick next run")?;

        let Some(row) = row else {
            tx.rollback().await.context("failed to rollback transaction")?;
            return Ok(None);
        };

        let run_id: Uuid = row.try_get("run_id")?;
        let requested_k: Option<i32> = row.try_get("requested_k")?;

        sqlx::query(
            r"
            UPDATE analysis_runs
            SET status = 'processing', started_at = NOW()
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark run as processing")?;

        tx.commit().await.context("failed to commit transaction")?;

        Ok(Some(QueuedRun {
            run_id,
            item_id: row.try_get("item_id")?,
            external_id: row.try_get("external_id")?,
            requested_k: requested_k.and_then(|k| usize::try_from(k).ok()),
        }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_are_reported() {
        let error = ensure_affected(0, "item", 42).expect_err("zero rows fails");
        assert_eq!(error.to_string(), "item 42 does not exist");
        assert!(ensure_affected(1, "run", Uuid::nil()).is_ok());
    }
}
