mod common;

use farm_core::config::OrchestratorConfig;
use farm_core::models::{Job, JobStatus, Task, TaskStatus, Worker};
use farm_core::SchedulerError;
use farm_dispatcher::FailureOutcome;
use farm_testing_utils::{JobBuilder, TaskBuilder, TestFixture, WorkerBuilder};
use uuid::Uuid;

/// An active job with one task assigned to `worker` and enough queued
/// siblings that a single hard failure stays below the job failure ratio.
fn active_job_with_task(worker: &Worker) -> (Job, Task, Vec<Task>) {
    let job = JobBuilder::new().with_status(JobStatus::Active).build();
    let task = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(worker.id)
        .build();
    let mut tasks = vec![task.clone()];
    for _ in 0..19 {
        tasks.push(TaskBuilder::for_job(&job).build());
    }
    (job, task, tasks)
}

#[tokio::test]
async fn test_first_failure_is_soft() {
    let worker = WorkerBuilder::new().with_name("w1").build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker);
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::SoftFailed);
    let stored = fixture.store.task(task.id);
    assert_eq!(stored.status, TaskStatus::SoftFailed);
    assert_eq!(stored.worker_id, None);
    assert_eq!(fixture.store.job(job.id).status, JobStatus::Active);
    assert_eq!(fixture.store.failures().len(), 1);
    assert!(fixture.store.blocklist().is_empty());
    assert_eq!(
        fixture.task_log.lines_of_task(task.id),
        vec![
            "Task failed by 1 worker, Manager will mark it as soft failure. 2 more failures will cause hard failure."
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_second_failure_stays_soft() {
    let worker = WorkerBuilder::new().with_name("w1").build();
    let earlier = WorkerBuilder::new().with_name("w2").build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&earlier);
    fixture.store.insert_failure(task.id, earlier.id);
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::SoftFailed);
    assert_eq!(
        fixture.task_log.lines_of_task(task.id),
        vec![
            "Task failed by 2 workers, Manager will mark it as soft failure. 1 more failure will cause hard failure."
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_failure_by_threshold_workers_is_hard() {
    let worker = WorkerBuilder::new().with_name("w1").build();
    let w2 = WorkerBuilder::new().with_name("w2").build();
    let w3 = WorkerBuilder::new().with_name("w3").build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&w2)
        .with_worker(&w3);
    fixture.store.insert_failure(task.id, w2.id);
    fixture.store.insert_failure(task.id, w3.id);
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::HardFailed);
    assert_eq!(fixture.store.task(task.id).status, TaskStatus::Failed);
    // 1 of 20 tasks failed, below the job failure percentage
    assert_eq!(fixture.store.job(job.id).status, JobStatus::Active);
    assert_eq!(
        fixture.task_log.lines_of_task(task.id),
        vec!["Task failed by 3 workers, Manager will mark it as hard failure".to_string()]
    );
}

#[tokio::test]
async fn test_repeated_failure_by_same_worker_counts_once() {
    let worker = WorkerBuilder::new().with_name("w1").build();
    let other = WorkerBuilder::new().with_name("w2").build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&other);
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    policy.task_failed_by_worker(&mut task, &worker).await.unwrap();
    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::SoftFailed);
    assert_eq!(fixture.store.failures().len(), 1);
}

#[tokio::test]
async fn test_blocklisting_is_idempotent() {
    let config = OrchestratorConfig {
        blocklist_threshold: 1,
        ..OrchestratorConfig::default()
    };
    let worker = WorkerBuilder::new().with_name("w1").build();
    let other = WorkerBuilder::new().with_name("w2").build();
    let (job, mut first, mut tasks) = active_job_with_task(&worker);
    let mut second = TaskBuilder::for_job(&job)
        .with_status(TaskStatus::Active)
        .with_worker(worker.id)
        .build();
    tasks.push(second.clone());
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&other);
    let policy = common::failure_policy(&fixture, &config);

    policy.task_failed_by_worker(&mut first, &worker).await.unwrap();
    policy.task_failed_by_worker(&mut second, &worker).await.unwrap();

    let blocklist = fixture.store.blocklist();
    assert_eq!(blocklist.len(), 1);
    assert_eq!(blocklist[0].job_id, job.id);
    assert_eq!(blocklist[0].worker_id, worker.id);
    assert_eq!(blocklist[0].task_type, "blender");
    assert_eq!(fixture.store.job(job.id).status, JobStatus::Active);
}

#[tokio::test]
async fn test_blocked_worker_gives_up_its_failed_tasks() {
    let worker = WorkerBuilder::new().with_name("w1").build();
    let other = WorkerBuilder::new().with_name("w2").build();
    let (job, mut task, mut tasks) = active_job_with_task(&worker);
    let failed: Vec<_> = (0..2)
        .map(|_| {
            TaskBuilder::for_job(&job)
                .with_status(TaskStatus::Failed)
                .with_worker(worker.id)
                .build()
        })
        .collect();
    tasks.extend(failed.iter().cloned());
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&other);
    for t in &failed {
        fixture.store.insert_failure(t.id, worker.id);
    }
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::SoftFailed);
    assert_eq!(fixture.store.blocklist().len(), 1);
    assert_eq!(fixture.store.task(task.id).status, TaskStatus::SoftFailed);
    for t in &failed {
        let stored = fixture.store.task(t.id);
        assert_eq!(stored.status, TaskStatus::Queued);
        assert_eq!(stored.worker_id, None);
        assert_eq!(
            stored.activity,
            "Task was requeued by Manager because worker w1 was blocked from tasks of type \"blender\""
        );
    }
    assert_eq!(fixture.store.job(job.id).status, JobStatus::Active);
}

#[tokio::test]
async fn test_blocking_last_eligible_worker_fails_job() {
    let config = OrchestratorConfig {
        blocklist_threshold: 1,
        ..OrchestratorConfig::default()
    };
    let worker = WorkerBuilder::new().with_name("w1").build();
    let encoder = WorkerBuilder::new()
        .with_name("w2")
        .with_task_types(&["ffmpeg"])
        .build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&encoder);
    let policy = common::failure_policy(&fixture, &config);

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::JobFailed);
    let stored_job = fixture.store.job(job.id);
    assert_eq!(stored_job.status, JobStatus::Failed);
    assert_eq!(
        stored_job.activity,
        "Changed to status \"failed\": no more workers left to run tasks of type \"blender\""
    );
    // hard failure even though only one worker failed it
    assert_eq!(fixture.store.task(task.id).status, TaskStatus::Failed);
    for sibling in &tasks[1..] {
        assert_eq!(fixture.store.task(sibling.id).status, TaskStatus::Canceled);
    }
    assert_eq!(
        fixture.task_log.lines_of_task(task.id),
        vec![format!(
            "Task failed by worker w1 ({}), Manager will fail the entire job as there are no more workers left for tasks of type \"blender\".",
            worker.id
        )]
    );
}

#[tokio::test]
async fn test_remaining_worker_that_already_failed_task_does_not_count() {
    let config = OrchestratorConfig {
        blocklist_threshold: 1,
        ..OrchestratorConfig::default()
    };
    let worker = WorkerBuilder::new().with_name("w1").build();
    let other = WorkerBuilder::new().with_name("w2").build();
    let (job, mut task, tasks) = active_job_with_task(&worker);
    let fixture = TestFixture::new()
        .with_job(&job, &tasks)
        .with_worker(&worker)
        .with_worker(&other);
    fixture.store.insert_failure(task.id, other.id);
    let policy = common::failure_policy(&fixture, &config);

    let outcome = policy.task_failed_by_worker(&mut task, &worker).await.unwrap();

    assert_eq!(outcome, FailureOutcome::JobFailed);
    assert_eq!(fixture.store.job(job.id).status, JobStatus::Failed);
}

#[tokio::test]
async fn test_failure_of_task_without_job_is_an_integrity_error() {
    let worker = WorkerBuilder::new().build();
    let mut task = TaskBuilder::new(Uuid::new_v4())
        .with_status(TaskStatus::Active)
        .build();
    let fixture = TestFixture::new().with_worker(&worker);
    fixture.store.insert_task(task.clone());
    let policy = common::failure_policy(&fixture, &OrchestratorConfig::default());

    let err = policy
        .task_failed_by_worker(&mut task, &worker)
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::DataIntegrity(_)));
    assert!(fixture.store.failures().is_empty());
}
