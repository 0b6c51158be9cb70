use farm_core::{SchedulerError, SchedulerResult};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// 按顺序执行的建表语句，全部可重复执行
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "作业表",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            job_type TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 50,
            status TEXT NOT NULL,
            activity TEXT NOT NULL DEFAULT '',
            settings TEXT NOT NULL DEFAULT '{}',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "Worker表",
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            platform TEXT NOT NULL DEFAULT '',
            software TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            status_requested TEXT,
            lazy_status_request INTEGER NOT NULL DEFAULT 0,
            supported_task_types TEXT NOT NULL DEFAULT '[]',
            last_seen_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "任务表",
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY NOT NULL,
            job_id TEXT NOT NULL,
            name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 50,
            status TEXT NOT NULL,
            worker_id TEXT,
            last_touched_at DATETIME,
            activity TEXT NOT NULL DEFAULT '',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
            FOREIGN KEY (worker_id) REFERENCES workers (id) ON DELETE SET NULL
        )
        "#,
    ),
    (
        "任务依赖表",
        r#"
        CREATE TABLE IF NOT EXISTS task_dependencies (
            task_id TEXT NOT NULL,
            dependency_id TEXT NOT NULL,
            PRIMARY KEY (task_id, dependency_id),
            FOREIGN KEY (task_id) REFERENCES tasks (id) ON DELETE CASCADE,
            FOREIGN KEY (dependency_id) REFERENCES tasks (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "作业黑名单表",
        r#"
        CREATE TABLE IF NOT EXISTS job_blocks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            task_type TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            UNIQUE (job_id, worker_id, task_type),
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
            FOREIGN KEY (worker_id) REFERENCES workers (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "任务失败记录表",
        r#"
        CREATE TABLE IF NOT EXISTS task_failures (
            task_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            PRIMARY KEY (task_id, worker_id),
            FOREIGN KEY (task_id) REFERENCES tasks (id) ON DELETE CASCADE,
            FOREIGN KEY (worker_id) REFERENCES workers (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "睡眠计划表",
        r#"
        CREATE TABLE IF NOT EXISTS sleep_schedules (
            worker_id TEXT PRIMARY KEY NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            days_of_week TEXT NOT NULL DEFAULT '',
            start_time TEXT,
            end_time TEXT,
            next_check DATETIME,
            FOREIGN KEY (worker_id) REFERENCES workers (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "作业状态索引",
        "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    ),
    (
        "任务作业索引",
        "CREATE INDEX IF NOT EXISTS idx_tasks_job_id ON tasks(job_id)",
    ),
    (
        "任务状态索引",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    ),
    (
        "任务Worker索引",
        "CREATE INDEX IF NOT EXISTS idx_tasks_worker_id ON tasks(worker_id)",
    ),
    (
        "Worker状态索引",
        "CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status)",
    ),
    (
        "睡眠计划检查时间索引",
        "CREATE INDEX IF NOT EXISTS idx_sleep_schedules_next_check ON sleep_schedules(next_check)",
    ),
];

/// 运行SQLite数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    info!("运行SQLite数据库迁移");

    for (description, sql) in MIGRATIONS {
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            SchedulerError::database_error(format!("创建{description}失败: {e}"))
        })?;
        debug!("已创建{}", description);
    }

    info!("数据库迁移完成");
    Ok(())
}
