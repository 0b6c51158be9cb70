pub mod schema;
pub mod sqlite_blocklist_repository;
pub mod sqlite_job_repository;
pub mod sqlite_sleep_schedule_repository;
pub mod sqlite_task_repository;
pub mod sqlite_worker_repository;

pub use schema::run_migrations;
pub use sqlite_blocklist_repository::SqliteBlocklistRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_sleep_schedule_repository::SqliteSleepScheduleRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_repository::SqliteWorkerRepository;
