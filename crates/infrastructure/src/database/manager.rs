use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use farm_core::{
    config::DatabaseConfig,
    traits::{
        BlocklistRepository, JobRepository, SleepScheduleRepository, TaskRepository,
        WorkerRepository,
    },
    SchedulerError, SchedulerResult,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::sqlite::{
    run_migrations, SqliteBlocklistRepository, SqliteJobRepository,
    SqliteSleepScheduleRepository, SqliteTaskRepository, SqliteWorkerRepository,
};

/// SQLite 连接池与各仓储的工厂
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(SchedulerError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let idle_timeout = (config.idle_timeout_seconds > 0)
            .then(|| Duration::from_secs(config.idle_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(SchedulerError::Database)?;

        info!("数据库连接池创建完成: {}", config.url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn worker_repository(&self) -> Arc<dyn WorkerRepository> {
        Arc::new(SqliteWorkerRepository::new(self.pool.clone()))
    }

    pub fn blocklist_repository(&self) -> Arc<dyn BlocklistRepository> {
        Arc::new(SqliteBlocklistRepository::new(self.pool.clone()))
    }

    pub fn sleep_schedule_repository(&self) -> Arc<dyn SleepScheduleRepository> {
        Arc::new(SqliteSleepScheduleRepository::new(self.pool.clone()))
    }
}
