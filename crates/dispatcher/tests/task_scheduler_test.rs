mod common;

use chrono::Duration;
use farm_core::config::OrchestratorConfig;
use farm_core::models::{JobStatus, TaskStatus};
use farm_dispatcher::TaskStateMachine;
use farm_testing_utils::{utc, JobBuilder, TaskBuilder, TestFixture, WorkerBuilder};

#[tokio::test]
async fn test_no_tasks_returns_none() {
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new().with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap();

    assert!(task.is_none());
}

#[tokio::test]
async fn test_highest_job_then_task_priority_first() {
    let job_a = JobBuilder::new().with_name("A").with_priority(50).build();
    let job_b = JobBuilder::new().with_name("B").with_priority(100).build();
    let tasks_a: Vec<_> = [50, 100, 50]
        .iter()
        .map(|p| TaskBuilder::for_job(&job_a).with_priority(*p).build())
        .collect();
    let tasks_b: Vec<_> = [50, 100, 150]
        .iter()
        .map(|p| TaskBuilder::for_job(&job_b).with_priority(*p).build())
        .collect();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job_a, &tasks_a)
        .with_job(&job_b, &tasks_b)
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap().unwrap();

    assert_eq!(task.id, tasks_b[2].id);
    assert_eq!(task.status, TaskStatus::Active);
    assert_eq!(task.worker_id, Some(worker.id));

    let stored = fixture.store.task(task.id);
    assert_eq!(stored.status, TaskStatus::Active);
    assert_eq!(stored.worker_id, Some(worker.id));
    assert_eq!(fixture.store.job(job_b.id).status, JobStatus::Active);
    assert_eq!(fixture.store.job(job_a.id).status, JobStatus::Queued);
}

#[tokio::test]
async fn test_older_task_wins_on_equal_priority() {
    let job = JobBuilder::new().build();
    let now = utc(2024, 3, 5, 12, 0, 0);
    let newer = TaskBuilder::for_job(&job).with_created_at(now).build();
    let older = TaskBuilder::for_job(&job)
        .with_created_at(now - Duration::minutes(5))
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[newer, older.clone()])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap().unwrap();

    assert_eq!(task.id, older.id);
}

#[tokio::test]
async fn test_partially_completed_dependencies_block_task() {
    let job = JobBuilder::new().build();
    let done = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Completed)
        .build();
    let running = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(uuid::Uuid::new_v4())
        .build();
    let dependent = TaskBuilder::for_job(&job)
        .with_priority(100)
        .with_dependencies(vec![done.id, running.id])
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[done, running, dependent])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap();

    assert!(task.is_none());
}

#[tokio::test]
async fn test_completed_dependencies_release_task() {
    let job = JobBuilder::new().build();
    let first = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Completed)
        .build();
    let second = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Completed)
        .build();
    let dependent = TaskBuilder::for_job(&job)
        .with_dependencies(vec![first.id, second.id])
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[first, second, dependent.clone()])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap().unwrap();

    assert_eq!(task.id, dependent.id);
}

#[tokio::test]
async fn test_unsupported_task_type_is_skipped() {
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).with_task_type("ffmpeg").build();
    let worker = WorkerBuilder::new().with_task_types(&["blender"]).build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());
}

#[tokio::test]
async fn test_jobs_in_other_statuses_are_skipped() {
    let worker = WorkerBuilder::new().build();
    let mut fixture = TestFixture::new().with_worker(&worker);
    for status in [
        JobStatus::UnderConstruction,
        JobStatus::Completed,
        JobStatus::CancelRequested,
        JobStatus::Canceled,
        JobStatus::Failed,
    ] {
        let job = JobBuilder::new().with_status(status).build();
        let task = TaskBuilder::for_job(&job).build();
        fixture = fixture.with_job(&job, &[task]);
    }
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());
}

#[tokio::test]
async fn test_blocklisted_worker_does_not_get_task() {
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    let worker = WorkerBuilder::new().build();
    let other = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task.clone()])
        .with_worker(&worker)
        .with_worker(&other);
    fixture.store.insert_block(job.id, worker.id, "blender");
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());

    let scheduled = scheduler.schedule_task(&other).await.unwrap().unwrap();
    assert_eq!(scheduled.id, task.id);
}

#[tokio::test]
async fn test_worker_does_not_get_task_it_failed_before() {
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::SoftFailed)
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task.clone()])
        .with_worker(&worker);
    fixture.store.insert_failure(task.id, worker.id);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());
}

#[tokio::test]
async fn test_active_task_is_returned_to_its_own_worker() {
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let worker = WorkerBuilder::new().build();
    let now = utc(2024, 3, 5, 12, 0, 0);
    let mine = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(worker.id)
        .with_last_touched_at(now - Duration::minutes(3))
        .build();
    let urgent = TaskBuilder::for_job(&job).with_priority(1000).build();
    let fixture = TestFixture::at(now)
        .with_job(&job, &[mine.clone(), urgent])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    let task = scheduler.schedule_task(&worker).await.unwrap().unwrap();

    assert_eq!(task.id, mine.id);
    assert_eq!(fixture.store.task(mine.id).last_touched_at, Some(now));
    // no status change, so nothing is broadcast
    assert!(fixture.broadcaster.task_updates().is_empty());
}

#[tokio::test]
async fn test_active_task_of_other_worker_is_never_handed_out() {
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let owner = WorkerBuilder::new().build();
    let task = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(owner.id)
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task])
        .with_worker(&owner)
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queued_task_stays_with_assigned_worker() {
    let job = JobBuilder::new().build();
    let owner = WorkerBuilder::new().build();
    let task = TaskBuilder::for_job(&job).with_worker(owner.id).build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task.clone()])
        .with_worker(&owner)
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    assert!(scheduler.schedule_task(&worker).await.unwrap().is_none());
    assert_eq!(fixture.store.task(task.id).worker_id, Some(owner.id));

    let scheduled = scheduler.schedule_task(&owner).await.unwrap().unwrap();
    assert_eq!(scheduled.id, task.id);
}

#[tokio::test]
async fn test_requeued_task_is_released_to_other_workers() {
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let lost = WorkerBuilder::new().with_name("lost").build();
    let task = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(lost.id)
        .build();
    let worker = WorkerBuilder::new().build();
    let fixture = TestFixture::new()
        .with_job(&job, &[task.clone()])
        .with_worker(&lost)
        .with_worker(&worker);
    let config = OrchestratorConfig::default();
    let sm = common::state_machine(&fixture, &config);
    let scheduler = common::task_scheduler(&fixture, &config);

    sm.requeue_tasks_of_worker(&lost, "worker timed out")
        .await
        .unwrap();
    assert_eq!(fixture.store.task(task.id).worker_id, None);

    let scheduled = scheduler.schedule_task(&worker).await.unwrap().unwrap();
    assert_eq!(scheduled.id, task.id);
    assert_eq!(fixture.store.task(task.id).worker_id, Some(worker.id));
}

#[tokio::test]
async fn test_scheduling_marks_worker_seen_and_task_touched() {
    let now = utc(2024, 3, 5, 12, 0, 0);
    let job = JobBuilder::new().build();
    let task = TaskBuilder::for_job(&job).build();
    let worker = WorkerBuilder::new()
        .with_last_seen_at(now - Duration::hours(1))
        .build();
    let fixture = TestFixture::at(now)
        .with_job(&job, &[task.clone()])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    scheduler.schedule_task(&worker).await.unwrap();

    assert_eq!(fixture.store.worker(worker.id).last_seen_at, Some(now));
    assert_eq!(fixture.store.task(task.id).last_touched_at, Some(now));
}

#[tokio::test]
async fn test_touch_and_seen() {
    let start = utc(2024, 3, 5, 12, 0, 0);
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let task = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_last_touched_at(start)
        .build();
    let worker = WorkerBuilder::new().with_last_seen_at(start).build();
    let fixture = TestFixture::at(start)
        .with_job(&job, &[task.clone()])
        .with_worker(&worker);
    let scheduler = common::task_scheduler(&fixture, &OrchestratorConfig::default());

    fixture.clock.advance(Duration::seconds(30));
    scheduler.task_touched_by_worker(task.id).await.unwrap();
    scheduler.worker_seen(worker.id).await.unwrap();

    let later = start + Duration::seconds(30);
    assert_eq!(fixture.store.task(task.id).last_touched_at, Some(later));
    assert_eq!(fixture.store.worker(worker.id).last_seen_at, Some(later));
}
