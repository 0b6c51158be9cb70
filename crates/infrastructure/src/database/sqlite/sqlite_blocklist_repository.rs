use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use farm_core::{models::JobBlock, traits::BlocklistRepository, SchedulerError, SchedulerResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

pub struct SqliteBlocklistRepository {
    pool: SqlitePool,
}

impl SqliteBlocklistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job_block(row: &SqliteRow) -> SchedulerResult<JobBlock> {
        Ok(JobBlock {
            job_id: MappingHelpers::parse_uuid(row, "job_id")?,
            worker_id: MappingHelpers::parse_uuid(row, "worker_id")?,
            task_type: row.try_get("task_type")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl BlocklistRepository for SqliteBlocklistRepository {
    async fn add_worker_to_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_blocks (job_id, worker_id, task_type, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id, worker_id, task_type) DO NOTHING
            "#,
        )
        .bind(job_id.to_string())
        .bind(worker_id.to_string())
        .bind(task_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() > 0 {
            debug!("Worker {} 已被作业 {} 的 {} 类型任务拉黑", worker_id, job_id, task_type);
        }
        Ok(())
    }

    async fn fetch_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<Vec<JobBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, worker_id, task_type, created_at FROM job_blocks
            WHERE job_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_job_block).collect()
    }

    async fn remove_from_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM job_blocks WHERE job_id = $1 AND worker_id = $2 AND task_type = $3")
            .bind(job_id.to_string())
            .bind(worker_id.to_string())
            .bind(task_type)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn clear_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM job_blocks WHERE job_id = $1")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn workers_left_to_run(
        &self,
        job_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<HashSet<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id FROM workers w
            WHERE EXISTS (SELECT 1 FROM json_each(w.supported_task_types) WHERE value = $2)
              AND NOT EXISTS (
                  SELECT 1 FROM job_blocks b
                  WHERE b.job_id = $1 AND b.worker_id = w.id AND b.task_type = $2
              )
            "#,
        )
        .bind(job_id.to_string())
        .bind(task_type)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter()
            .map(|row| MappingHelpers::parse_uuid(row, "id"))
            .collect()
    }

    async fn count_task_failures_of_worker(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS num_failed FROM task_failures f
            JOIN tasks t ON t.id = f.task_id
            WHERE t.job_id = $1 AND f.worker_id = $2 AND t.task_type = $3
            "#,
        )
        .bind(job_id.to_string())
        .bind(worker_id.to_string())
        .bind(task_type)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(row.try_get("num_failed")?)
    }
}
