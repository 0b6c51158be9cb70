use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farm_core::{
    models::{Task, TaskStatus, Worker},
    traits::TaskRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::sqlite_worker_repository::{SqliteWorkerRepository, WORKER_COLUMNS};
use crate::database::mapping::MappingHelpers;

const TASK_SELECT: &str = r#"
    SELECT t.id, t.job_id, t.name, t.task_type, t.priority, t.status, t.worker_id,
           t.last_touched_at, t.activity, t.created_at, t.updated_at,
           (SELECT group_concat(d.dependency_id, ',') FROM task_dependencies d WHERE d.task_id = t.id) AS dependencies
    FROM tasks t
"#;

/// 挑选并分配任务，单条 UPDATE 语句内完成，SQLite 保证其原子性
///
/// 候选条件：
/// - 任务处于 queued/soft-failed/active，且未分配或已分配给本Worker
///   （分配与置为 active 之间任务仍为 queued，分配本身即是占用）
/// - 作业处于 active/queued/requeued
/// - Worker支持该任务类型（`$2` 为类型列表的JSON）
/// - 所有依赖已完成
/// - Worker未被该作业的此类型任务拉黑，且没有失败过该任务
///
/// 排序：本Worker已在执行的任务优先，其次作业优先级、任务优先级（降序），最后创建时间（升序）。
const SCHEDULE_TASK_SQL: &str = r#"
    UPDATE tasks SET worker_id = $1, updated_at = $3
    WHERE id = (
        SELECT t.id FROM tasks t
        JOIN jobs j ON j.id = t.job_id
        WHERE t.status IN ('queued', 'soft-failed', 'active')
          AND (t.worker_id IS NULL OR t.worker_id = $1)
          AND j.status IN ('active', 'queued', 'requeued')
          AND t.task_type IN (SELECT value FROM json_each($2))
          AND NOT EXISTS (
              SELECT 1 FROM task_dependencies d
              LEFT JOIN tasks dt ON dt.id = d.dependency_id
              WHERE d.task_id = t.id AND (dt.status IS NULL OR dt.status != 'completed')
          )
          AND NOT EXISTS (
              SELECT 1 FROM job_blocks b
              WHERE b.job_id = t.job_id AND b.worker_id = $1 AND b.task_type = t.task_type
          )
          AND NOT EXISTS (
              SELECT 1 FROM task_failures f
              WHERE f.task_id = t.id AND f.worker_id = $1
          )
        ORDER BY (t.status = 'active') DESC, j.priority DESC, t.priority DESC, t.created_at ASC, t.id ASC
        LIMIT 1
    )
    RETURNING id
"#;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: MappingHelpers::parse_uuid(row, "id")?,
            job_id: MappingHelpers::parse_uuid(row, "job_id")?,
            name: row.try_get("name")?,
            task_type: row.try_get("task_type")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            worker_id: MappingHelpers::parse_optional_uuid(row, "worker_id")?,
            dependencies: MappingHelpers::parse_uuid_list(row, "dependencies")?,
            last_touched_at: row.try_get("last_touched_at")?,
            activity: row.try_get("activity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("{TASK_SELECT} WHERE t.id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_tasks_of_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "{TASK_SELECT} WHERE t.job_id = $1 ORDER BY t.created_at, t.id"
        ))
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn save_task(&self, task: &Task) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, activity = $2, worker_id = $3, last_touched_at = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(task.status)
        .bind(&task.activity)
        .bind(task.worker_id.map(|id| id.to_string()))
        .bind(task.last_touched_at)
        .bind(Utc::now())
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task.id });
        }

        debug!("保存任务: {} 状态 {}", task.id, task.status);
        Ok(())
    }

    async fn save_task_activity(&self, task: &Task) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE tasks SET activity = $1, updated_at = $2 WHERE id = $3")
            .bind(&task.activity)
            .bind(Utc::now())
            .bind(task.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn fetch_tasks_of_worker_in_status(
        &self,
        worker_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "{TASK_SELECT} WHERE t.worker_id = $1 AND t.status = $2 ORDER BY t.created_at, t.id"
        ))
        .bind(worker_id.to_string())
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn fetch_tasks_of_worker_in_status_of_job(
        &self,
        worker_id: Uuid,
        job_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "{TASK_SELECT} WHERE t.worker_id = $1 AND t.job_id = $2 AND t.status = $3 ORDER BY t.created_at, t.id"
        ))
        .bind(worker_id.to_string())
        .bind(job_id.to_string())
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn task_touched_by_worker(
        &self,
        task_id: Uuid,
        at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE tasks SET last_touched_at = $1 WHERE id = $2")
            .bind(at)
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        }
        Ok(())
    }

    async fn fetch_timed_out_tasks(
        &self,
        untouched_since: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            r#"{TASK_SELECT}
            WHERE t.status = $1 AND t.last_touched_at IS NOT NULL AND t.last_touched_at <= $2
            ORDER BY t.last_touched_at"#
        ))
        .bind(TaskStatus::Active)
        .bind(untouched_since)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn schedule_task(&self, worker: &Worker) -> SchedulerResult<Option<Task>> {
        if worker.supported_task_types.is_empty() {
            return Ok(None);
        }
        let task_types = MappingHelpers::to_json(&worker.supported_task_types, "任务类型列表")?;

        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        let assigned = sqlx::query(SCHEDULE_TASK_SQL)
            .bind(worker.id.to_string())
            .bind(task_types)
            .bind(Utc::now())
            .fetch_optional(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;

        let Some(assigned) = assigned else {
            tx.commit().await.map_err(SchedulerError::Database)?;
            return Ok(None);
        };
        let task_id: String = assigned.try_get("id")?;

        let row = sqlx::query(&format!("{TASK_SELECT} WHERE t.id = $1"))
            .bind(&task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;
        let task = Self::row_to_task(&row)?;

        tx.commit().await.map_err(SchedulerError::Database)?;

        debug!("为Worker {} 分配任务 {}", worker.identifier(), task.id);
        Ok(Some(task))
    }

    async fn add_worker_to_task_failed_list(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
    ) -> SchedulerResult<i64> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO task_failures (task_id, worker_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (task_id, worker_id) DO NOTHING
            "#,
        )
        .bind(task_id.to_string())
        .bind(worker_id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(SchedulerError::Database)?;

        let row = sqlx::query("SELECT COUNT(*) AS num_failed FROM task_failures WHERE task_id = $1")
            .bind(task_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;
        let num_failed: i64 = row.try_get("num_failed")?;

        tx.commit().await.map_err(SchedulerError::Database)?;
        Ok(num_failed)
    }

    async fn fetch_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WORKER_COLUMNS} FROM workers
            WHERE id IN (SELECT worker_id FROM task_failures WHERE task_id = $1)
            ORDER BY name
            "#
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(SqliteWorkerRepository::row_to_worker).collect()
    }

    async fn clear_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM task_failures WHERE task_id = $1")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }
}
