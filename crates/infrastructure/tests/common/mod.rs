#![allow(dead_code)]

use farm_core::config::DatabaseConfig;
use farm_core::models::{Job, Task, Worker};
use farm_infrastructure::DatabaseManager;
use tempfile::TempDir;

/// A migrated SQLite database in a throwaway directory.
///
/// Keep the `TempDir` alive for as long as the manager is used.
pub async fn setup_database() -> (TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("farm.sqlite").display()),
        ..DatabaseConfig::default()
    };
    let db = DatabaseManager::new(&config).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

pub async fn insert_workers(db: &DatabaseManager, workers: &[&Worker]) {
    let repo = db.worker_repository();
    for worker in workers {
        repo.create_worker(worker).await.unwrap();
    }
}

pub async fn insert_job(db: &DatabaseManager, job: &Job, tasks: &[Task]) {
    db.job_repository().create_job(job, tasks).await.unwrap();
}
