use async_trait::async_trait;
use chrono::Utc;
use farm_core::{
    models::{Job, JobStatus, Task, TaskMassUpdate, TaskStatus},
    traits::JobRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

const JOB_COLUMNS: &str =
    "id, name, job_type, priority, status, activity, settings, metadata, created_at, updated_at";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &SqliteRow) -> SchedulerResult<Job> {
        Ok(Job {
            id: MappingHelpers::parse_uuid(row, "id")?,
            name: row.try_get("name")?,
            job_type: row.try_get("job_type")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            activity: row.try_get("activity")?,
            settings: MappingHelpers::parse_json_sqlite(row, "settings")?,
            metadata: MappingHelpers::parse_json_sqlite(row, "metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> SchedulerResult<()> {
        let settings = MappingHelpers::to_json(&job.settings, "作业设置")?;
        let metadata = MappingHelpers::to_json(&job.metadata, "作业元数据")?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, job_type, priority, status, activity, settings, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.job_type)
        .bind(job.priority)
        .bind(job.status)
        .bind(&job.activity)
        .bind(settings)
        .bind(metadata)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, job_id, name, task_type, priority, status, worker_id, last_touched_at, activity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.job_id.to_string())
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(task.priority)
        .bind(task.status)
        .bind(task.worker_id.map(|id| id.to_string()))
        .bind(task.last_touched_at)
        .bind(&task.activity)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn insert_dependencies(conn: &mut SqliteConnection, task: &Task) -> SchedulerResult<()> {
        for dependency in &task.dependencies {
            sqlx::query("INSERT INTO task_dependencies (task_id, dependency_id) VALUES ($1, $2)")
                .bind(task.id.to_string())
                .bind(dependency.to_string())
                .execute(&mut *conn)
                .await
                .map_err(SchedulerError::Database)?;
        }
        Ok(())
    }

    async fn save_job_status_with(conn: &mut SqliteConnection, job: &Job) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, activity = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(job.status)
        .bind(&job.activity)
        .bind(Utc::now())
        .bind(job.id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobNotFound { id: job.id });
        }
        Ok(())
    }

    /// `only_statuses` 为 `None` 时更新作业的全部任务
    async fn update_tasks_with(
        conn: &mut SqliteConnection,
        job_id: Uuid,
        only_statuses: Option<&[TaskStatus]>,
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<u64> {
        let release_worker = new_status.releases_worker();
        let result = match only_statuses {
            None => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = $1, activity = $2, updated_at = $3,
                        worker_id = CASE WHEN $5 THEN NULL ELSE worker_id END
                    WHERE job_id = $4
                    "#,
                )
                .bind(new_status)
                .bind(activity)
                .bind(Utc::now())
                .bind(job_id.to_string())
                .bind(release_worker)
                .execute(&mut *conn)
                .await
            }
            Some(statuses) => {
                let statuses = MappingHelpers::to_json(statuses, "任务状态列表")?;
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = $1, activity = $2, updated_at = $3,
                        worker_id = CASE WHEN $6 THEN NULL ELSE worker_id END
                    WHERE job_id = $4 AND status IN (SELECT value FROM json_each($5))
                    "#,
                )
                .bind(new_status)
                .bind(activity)
                .bind(Utc::now())
                .bind(job_id.to_string())
                .bind(statuses)
                .bind(release_worker)
                .execute(&mut *conn)
                .await
            }
        }
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected())
    }

    async fn clear_failures_with(conn: &mut SqliteConnection, job_id: Uuid) -> SchedulerResult<()> {
        sqlx::query(
            "DELETE FROM task_failures WHERE task_id IN (SELECT id FROM tasks WHERE job_id = $1)",
        )
        .bind(job_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        Self::insert_job(&mut tx, job).await?;
        for task in tasks {
            Self::insert_task(&mut tx, task).await?;
        }
        // 依赖可能指向同一批中靠后的任务，必须等全部任务写入后再建立
        for task in tasks {
            Self::insert_dependencies(&mut tx, task).await?;
        }

        tx.commit().await.map_err(SchedulerError::Database)?;

        debug!("创建作业成功: {} ({} 个任务)", job.id, tasks.len());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> SchedulerResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_job_status(&self, job: &Job) -> SchedulerResult<()> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        Self::save_job_status_with(&mut conn, job).await?;
        debug!("保存作业状态: {} -> {}", job.id, job.status);
        Ok(())
    }

    async fn fetch_jobs_in_status(&self, statuses: &[JobStatus]) -> SchedulerResult<Vec<Job>> {
        let statuses = MappingHelpers::to_json(statuses, "作业状态列表")?;
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN (SELECT value FROM json_each($1)) ORDER BY created_at"
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn job_has_tasks_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<bool> {
        let statuses = MappingHelpers::to_json(statuses, "任务状态列表")?;
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tasks
                WHERE job_id = $1 AND status IN (SELECT value FROM json_each($2))
            ) AS found
            "#,
        )
        .bind(job_id.to_string())
        .bind(statuses)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(row.try_get("found")?)
    }

    async fn count_tasks_of_job_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<(i64, i64)> {
        let statuses = MappingHelpers::to_json(statuses, "任务状态列表")?;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status IN (SELECT value FROM json_each($2)) THEN 1 ELSE 0 END), 0) AS in_status
            FROM tasks
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.to_string())
        .bind(statuses)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok((row.try_get("in_status")?, row.try_get("total")?))
    }

    async fn update_job_tasks_statuses(
        &self,
        job_id: Uuid,
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        let updated = Self::update_tasks_with(&mut conn, job_id, None, new_status, activity).await?;
        debug!("作业 {} 的 {} 个任务更新为 {}", job_id, updated, new_status);
        Ok(())
    }

    async fn update_job_tasks_statuses_conditional(
        &self,
        job_id: Uuid,
        statuses_to_update: &[TaskStatus],
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        let updated = Self::update_tasks_with(
            &mut conn,
            job_id,
            Some(statuses_to_update),
            new_status,
            activity,
        )
        .await?;
        debug!("作业 {} 的 {} 个任务更新为 {}", job_id, updated, new_status);
        Ok(())
    }

    async fn clear_job_failure_list(&self, job_id: Uuid) -> SchedulerResult<()> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        Self::clear_failures_with(&mut conn, job_id).await
    }

    async fn save_job_status_and_update_tasks(
        &self,
        job: &Job,
        update: Option<&TaskMassUpdate>,
    ) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        Self::save_job_status_with(&mut tx, job).await?;
        if let Some(update) = update {
            Self::update_tasks_with(
                &mut tx,
                job.id,
                update.only_statuses.as_deref(),
                update.new_status,
                &update.activity,
            )
            .await?;
            if update.clear_failures {
                Self::clear_failures_with(&mut tx, job.id).await?;
            }
        }

        tx.commit().await.map_err(SchedulerError::Database)?;

        debug!("保存作业状态: {} -> {}", job.id, job.status);
        Ok(())
    }
}
