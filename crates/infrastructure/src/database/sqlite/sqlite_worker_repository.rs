use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farm_core::{
    models::{Worker, WorkerStatus},
    traits::WorkerRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

pub(crate) const WORKER_COLUMNS: &str = "id, name, address, platform, software, status, \
    status_requested, lazy_status_request, supported_task_types, last_seen_at, created_at, updated_at";

pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_worker(row: &SqliteRow) -> SchedulerResult<Worker> {
        Ok(Worker {
            id: MappingHelpers::parse_uuid(row, "id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            platform: row.try_get("platform")?,
            software: row.try_get("software")?,
            status: row.try_get("status")?,
            status_requested: row.try_get("status_requested")?,
            lazy_status_request: row.try_get("lazy_status_request")?,
            supported_task_types: MappingHelpers::parse_json_sqlite(row, "supported_task_types")?,
            last_seen_at: row.try_get("last_seen_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn create_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        let supported_task_types =
            MappingHelpers::to_json(&worker.supported_task_types, "任务类型列表")?;

        sqlx::query(
            r#"
            INSERT INTO workers (id, name, address, platform, software, status, status_requested,
                                 lazy_status_request, supported_task_types, last_seen_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(worker.id.to_string())
        .bind(&worker.name)
        .bind(&worker.address)
        .bind(&worker.platform)
        .bind(&worker.software)
        .bind(worker.status)
        .bind(worker.status_requested)
        .bind(worker.lazy_status_request)
        .bind(supported_task_types)
        .bind(worker.last_seen_at)
        .bind(worker.created_at)
        .bind(worker.updated_at)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("注册Worker成功: {}", worker.identifier());
        Ok(())
    }

    async fn get_worker(&self, id: Uuid) -> SchedulerResult<Option<Worker>> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_worker(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_workers(&self) -> SchedulerResult<Vec<Worker>> {
        let rows = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn save_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        let supported_task_types =
            MappingHelpers::to_json(&worker.supported_task_types, "任务类型列表")?;

        let result = sqlx::query(
            r#"
            UPDATE workers
            SET name = $1, address = $2, platform = $3, software = $4, status = $5,
                status_requested = $6, lazy_status_request = $7, supported_task_types = $8,
                last_seen_at = $9, updated_at = $10
            WHERE id = $11
            "#,
        )
        .bind(&worker.name)
        .bind(&worker.address)
        .bind(&worker.platform)
        .bind(&worker.software)
        .bind(worker.status)
        .bind(worker.status_requested)
        .bind(worker.lazy_status_request)
        .bind(supported_task_types)
        .bind(worker.last_seen_at)
        .bind(Utc::now())
        .bind(worker.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkerNotFound { id: worker.id });
        }
        Ok(())
    }

    async fn save_worker_status(&self, worker: &Worker) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workers
            SET status = $1, status_requested = $2, lazy_status_request = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(worker.status)
        .bind(worker.status_requested)
        .bind(worker.lazy_status_request)
        .bind(Utc::now())
        .bind(worker.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkerNotFound { id: worker.id });
        }

        debug!("保存Worker状态: {} -> {}", worker.identifier(), worker.status);
        Ok(())
    }

    async fn worker_seen(&self, worker_id: Uuid, at: DateTime<Utc>) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE workers SET last_seen_at = $1 WHERE id = $2")
            .bind(at)
            .bind(worker_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkerNotFound { id: worker_id });
        }
        Ok(())
    }

    async fn fetch_timed_out_workers(
        &self,
        last_seen_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WORKER_COLUMNS} FROM workers
            WHERE status NOT IN ($1, $2) AND last_seen_at IS NOT NULL AND last_seen_at < $3
            ORDER BY last_seen_at
            "#
        ))
        .bind(WorkerStatus::Offline)
        .bind(WorkerStatus::Error)
        .bind(last_seen_before)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }
}
