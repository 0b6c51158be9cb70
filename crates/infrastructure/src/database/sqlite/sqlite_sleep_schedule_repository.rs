use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farm_core::{
    models::SleepSchedule, traits::SleepScheduleRepository, SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

const SCHEDULE_COLUMNS: &str = "worker_id, is_active, days_of_week, start_time, end_time, next_check";

pub struct SqliteSleepScheduleRepository {
    pool: SqlitePool,
}

impl SqliteSleepScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &SqliteRow) -> SchedulerResult<SleepSchedule> {
        Ok(SleepSchedule {
            worker_id: MappingHelpers::parse_uuid(row, "worker_id")?,
            is_active: row.try_get("is_active")?,
            days_of_week: row.try_get("days_of_week")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            next_check: row.try_get("next_check")?,
        })
    }
}

#[async_trait]
impl SleepScheduleRepository for SqliteSleepScheduleRepository {
    async fn fetch_worker_sleep_schedule(
        &self,
        worker_id: Uuid,
    ) -> SchedulerResult<Option<SleepSchedule>> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM sleep_schedules WHERE worker_id = $1"
        ))
        .bind(worker_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_schedule(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_worker_sleep_schedule(&self, schedule: &SleepSchedule) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sleep_schedules (worker_id, is_active, days_of_week, start_time, end_time, next_check)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (worker_id) DO UPDATE SET
                is_active = excluded.is_active,
                days_of_week = excluded.days_of_week,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                next_check = excluded.next_check
            "#,
        )
        .bind(schedule.worker_id.to_string())
        .bind(schedule.is_active)
        .bind(&schedule.days_of_week)
        .bind(schedule.start_time)
        .bind(schedule.end_time)
        .bind(schedule.next_check)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("保存Worker {} 的睡眠计划", schedule.worker_id);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(SchedulerError::WorkerNotFound {
                    id: schedule.worker_id,
                })
            }
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    async fn set_worker_sleep_schedule_next_check(
        &self,
        schedule: &SleepSchedule,
    ) -> SchedulerResult<()> {
        sqlx::query("UPDATE sleep_schedules SET next_check = $1 WHERE worker_id = $2")
            .bind(schedule.next_check)
            .bind(schedule.worker_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn fetch_sleep_schedules_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<SleepSchedule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM sleep_schedules
            WHERE is_active = 1 AND (next_check IS NULL OR next_check <= $1)
            ORDER BY next_check
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_schedule).collect()
    }
}
