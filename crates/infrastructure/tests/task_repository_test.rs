mod common;

use chrono::Duration;
use farm_core::models::{JobStatus, TaskStatus};
use farm_core::SchedulerError;
use farm_testing_utils::{utc, JobBuilder, TaskBuilder, WorkerBuilder};

#[tokio::test]
async fn test_schedule_task_picks_highest_priority() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker]).await;

    let job_a = JobBuilder::new().with_priority(50).build();
    let job_b = JobBuilder::new().with_priority(100).build();
    let tasks_a: Vec<_> = [50, 100, 50]
        .iter()
        .map(|p| TaskBuilder::for_job(&job_a).with_priority(*p).build())
        .collect();
    let tasks_b: Vec<_> = [50, 100, 150]
        .iter()
        .map(|p| TaskBuilder::for_job(&job_b).with_priority(*p).build())
        .collect();
    common::insert_job(&db, &job_a, &tasks_a).await;
    common::insert_job(&db, &job_b, &tasks_b).await;

    let task = db
        .task_repository()
        .schedule_task(&worker)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.id, tasks_b[2].id);
    assert_eq!(task.worker_id, Some(worker.id));
    // assignment only, status changes belong to the state machine
    assert_eq!(task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_schedule_task_prefers_older_task_on_equal_priority() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker]).await;
    let now = utc(2024, 3, 5, 12, 0, 0);
    let job = JobBuilder::new().build();
    let newer = TaskBuilder::for_job(&job).with_created_at(now).build();
    let older = TaskBuilder::for_job(&job)
        .with_created_at(now - Duration::minutes(5))
        .build();
    common::insert_job(&db, &job, &[newer, older.clone()]).await;

    let task = db
        .task_repository()
        .schedule_task(&worker)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.id, older.id);
}

#[tokio::test]
async fn test_schedule_task_respects_dependencies() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().build();
    let other = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker, &other]).await;
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let done = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Completed)
        .build();
    let running = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(other.id)
        .build();
    let dependent = TaskBuilder::for_job(&job)
        .with_dependencies(vec![done.id, running.id])
        .build();
    common::insert_job(&db, &job, &[done, running.clone(), dependent.clone()]).await;
    let repo = db.task_repository();

    assert!(repo.schedule_task(&worker).await.unwrap().is_none());

    let mut finished = repo.get_task(running.id).await.unwrap().unwrap();
    finished.status = TaskStatus::Completed;
    repo.save_task(&finished).await.unwrap();

    let task = repo.schedule_task(&worker).await.unwrap().unwrap();
    assert_eq!(task.id, dependent.id);
    assert_eq!(task.dependencies.len(), 2);
}

#[tokio::test]
async fn test_schedule_task_filters() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().with_task_types(&["blender"]).build();
    let owner = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker, &owner]).await;

    let unsupported_job = JobBuilder::new().build();
    let unsupported = TaskBuilder::for_job(&unsupported_job)
        .with_task_type("ffmpeg")
        .build();
    common::insert_job(&db, &unsupported_job, &[unsupported]).await;

    for status in [
        JobStatus::UnderConstruction,
        JobStatus::Completed,
        JobStatus::CancelRequested,
        JobStatus::Canceled,
        JobStatus::Failed,
    ] {
        let job = JobBuilder::new().with_status(status).build();
        let task = TaskBuilder::for_job(&job).build();
        common::insert_job(&db, &job, &[task]).await;
    }

    let busy_job = JobBuilder::new().with_status(JobStatus::Active).build();
    let busy = TaskBuilder::for_job(&busy_job)
        .with_status(TaskStatus::Active)
        .with_worker(owner.id)
        .build();
    common::insert_job(&db, &busy_job, &[busy]).await;

    let blocked_job = JobBuilder::new().build();
    let blocked = TaskBuilder::for_job(&blocked_job).build();
    common::insert_job(&db, &blocked_job, &[blocked]).await;
    db.blocklist_repository()
        .add_worker_to_job_blocklist(blocked_job.id, worker.id, "blender")
        .await
        .unwrap();

    let failed_job = JobBuilder::new().build();
    let failed_before = TaskBuilder::for_job(&failed_job)
        .with_status(TaskStatus::SoftFailed)
        .build();
    common::insert_job(&db, &failed_job, &[failed_before.clone()]).await;
    db.task_repository()
        .add_worker_to_task_failed_list(failed_before.id, worker.id)
        .await
        .unwrap();

    assert!(db
        .task_repository()
        .schedule_task(&worker)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_schedule_task_returns_own_active_task_first() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker]).await;
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let mine = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(worker.id)
        .build();
    let urgent = TaskBuilder::for_job(&job).with_priority(1000).build();
    common::insert_job(&db, &job, &[mine.clone(), urgent]).await;

    let task = db
        .task_repository()
        .schedule_task(&worker)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.id, mine.id);
    assert_eq!(task.status, TaskStatus::Active);
}

#[tokio::test]
async fn test_schedule_task_respects_existing_assignment() {
    let (_dir, db) = common::setup_database().await;
    let owner = WorkerBuilder::new().build();
    let worker = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&owner, &worker]).await;
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).with_worker(owner.id).build();
    common::insert_job(&db, &job, &[task.clone()]).await;
    let repo = db.task_repository();

    assert!(repo.schedule_task(&worker).await.unwrap().is_none());

    let scheduled = repo.schedule_task(&owner).await.unwrap().unwrap();
    assert_eq!(scheduled.id, task.id);
    assert_eq!(scheduled.worker_id, Some(owner.id));
}

#[tokio::test]
async fn test_assigned_task_is_not_handed_out_twice() {
    let (_dir, db) = common::setup_database().await;
    let first = WorkerBuilder::new().build();
    let second = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&first, &second]).await;
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    common::insert_job(&db, &job, &[task.clone()]).await;
    let repo = db.task_repository();

    // the task is still queued until the scheduler activates it
    let assigned = repo.schedule_task(&first).await.unwrap().unwrap();
    assert_eq!(assigned.id, task.id);
    assert_eq!(assigned.status, TaskStatus::Queued);

    assert!(repo.schedule_task(&second).await.unwrap().is_none());
    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.worker_id, Some(first.id));
}

#[tokio::test]
async fn test_concurrent_schedulers_never_share_a_task() {
    let (_dir, db) = common::setup_database().await;
    let first = WorkerBuilder::new().build();
    let second = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&first, &second]).await;
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    common::insert_job(&db, &job, &[task]).await;
    let repo = db.task_repository();

    let (a, b) = tokio::join!(repo.schedule_task(&first), repo.schedule_task(&second));
    let assigned: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(assigned.len(), 1);
}

#[tokio::test]
async fn test_save_task_and_touch() {
    let (_dir, db) = common::setup_database().await;
    let worker = WorkerBuilder::new().build();
    common::insert_workers(&db, &[&worker]).await;
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    common::insert_job(&db, &job, &[task.clone()]).await;
    let repo = db.task_repository();

    let mut updated = task.clone();
    updated.status = TaskStatus::Active;
    updated.worker_id = Some(worker.id);
    updated.activity = "rendering".to_string();
    repo.save_task(&updated).await.unwrap();

    let touched_at = utc(2024, 3, 5, 12, 0, 0);
    repo.task_touched_by_worker(task.id, touched_at).await.unwrap();

    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Active);
    assert_eq!(stored.worker_id, Some(worker.id));
    assert_eq!(stored.activity, "rendering");
    assert_eq!(stored.last_touched_at, Some(touched_at));

    let active = repo
        .fetch_tasks_of_worker_in_status(worker.id, TaskStatus::Active)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert!(repo
        .fetch_tasks_of_worker_in_status_of_job(worker.id, uuid::Uuid::new_v4(), TaskStatus::Active)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_save_unknown_task() {
    let (_dir, db) = common::setup_database().await;
    let task = TaskBuilder::new(uuid::Uuid::new_v4()).build();
    let repo = db.task_repository();

    let err = repo.save_task(&task).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { .. }));

    let err = repo
        .task_touched_by_worker(task.id, utc(2024, 3, 5, 12, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_fetch_timed_out_tasks() {
    let (_dir, db) = common::setup_database().await;
    let now = utc(2024, 3, 5, 12, 0, 0);
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let stale = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_last_touched_at(now - Duration::minutes(10))
        .build();
    let boundary = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_last_touched_at(now - Duration::minutes(5))
        .build();
    let fresh = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_last_touched_at(now - Duration::minutes(1))
        .build();
    let queued = TaskBuilder::for_job(&job)
        .with_last_touched_at(now - Duration::hours(1))
        .build();
    common::insert_job(&db, &job, &[stale.clone(), boundary.clone(), fresh, queued]).await;

    let timed_out = db
        .task_repository()
        .fetch_timed_out_tasks(now - Duration::minutes(5))
        .await
        .unwrap();

    let ids: Vec<_> = timed_out.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![stale.id, boundary.id]);
}

#[tokio::test]
async fn test_failure_list() {
    let (_dir, db) = common::setup_database().await;
    let w1 = WorkerBuilder::new().with_name("w1").build();
    let w2 = WorkerBuilder::new().with_name("w2").build();
    common::insert_workers(&db, &[&w1, &w2]).await;
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    common::insert_job(&db, &job, &[task.clone()]).await;
    let repo = db.task_repository();

    assert_eq!(repo.add_worker_to_task_failed_list(task.id, w1.id).await.unwrap(), 1);
    assert_eq!(repo.add_worker_to_task_failed_list(task.id, w1.id).await.unwrap(), 1);
    assert_eq!(repo.add_worker_to_task_failed_list(task.id, w2.id).await.unwrap(), 2);

    let names: Vec<_> = repo
        .fetch_task_failure_list(task.id)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.name)
        .collect();
    assert_eq!(names, vec!["w1", "w2"]);

    repo.clear_task_failure_list(task.id).await.unwrap();
    assert!(repo.fetch_task_failure_list(task.id).await.unwrap().is_empty());
}
