//! Mock implementations for all collaborator traits
//!
//! `MockStore` keeps jobs, tasks, workers, blocklist entries, task failures
//! and sleep schedules in memory and implements every repository trait, so a
//! single `Arc<MockStore>` can be handed to each component. Its query
//! semantics mirror the SQLite gateway.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farm_core::models::{
    ChangeEvent, Job, JobBlock, JobStatus, JobUpdate, SleepSchedule, Task, TaskFailure,
    TaskStatus, TaskUpdate, Worker, WorkerStatus, WorkerUpdate,
};
use farm_core::traits::{
    BlocklistRepository, ChangeBroadcaster, Clock, JobRepository, SleepScheduleRepository,
    TaskLogSink, TaskRepository, WorkerRepository,
};
use farm_core::{SchedulerError, SchedulerResult};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
    workers: HashMap<Uuid, Worker>,
    blocklist: Vec<JobBlock>,
    failures: Vec<TaskFailure>,
    schedules: HashMap<Uuid, SleepSchedule>,
    failing_task_saves: HashSet<Uuid>,
    job_status_saves: Vec<(Uuid, JobStatus)>,
}

/// In-memory persistence gateway for testing
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_job(&self, job: Job) {
        self.state.lock().unwrap().jobs.insert(job.id, job);
    }

    pub fn insert_task(&self, task: Task) {
        self.state.lock().unwrap().tasks.insert(task.id, task);
    }

    pub fn insert_worker(&self, worker: Worker) {
        self.state.lock().unwrap().workers.insert(worker.id, worker);
    }

    pub fn insert_schedule(&self, schedule: SleepSchedule) {
        self.state
            .lock()
            .unwrap()
            .schedules
            .insert(schedule.worker_id, schedule);
    }

    /// Records a failure without going through the failure policy.
    pub fn insert_failure(&self, task_id: Uuid, worker_id: Uuid) {
        self.state.lock().unwrap().failures.push(TaskFailure {
            task_id,
            worker_id,
            created_at: Utc::now(),
        });
    }

    pub fn insert_block(&self, job_id: Uuid, worker_id: Uuid, task_type: &str) {
        self.state.lock().unwrap().blocklist.push(JobBlock {
            job_id,
            worker_id,
            task_type: task_type.to_string(),
            created_at: Utc::now(),
        });
    }

    pub fn job(&self, id: Uuid) -> Job {
        self.state.lock().unwrap().jobs[&id].clone()
    }

    pub fn task(&self, id: Uuid) -> Task {
        self.state.lock().unwrap().tasks[&id].clone()
    }

    pub fn worker(&self, id: Uuid) -> Worker {
        self.state.lock().unwrap().workers[&id].clone()
    }

    pub fn schedule(&self, worker_id: Uuid) -> Option<SleepSchedule> {
        self.state
            .lock()
            .unwrap()
            .schedules
            .get(&worker_id)
            .cloned()
    }

    pub fn blocklist(&self) -> Vec<JobBlock> {
        self.state.lock().unwrap().blocklist.clone()
    }

    pub fn failures(&self) -> Vec<TaskFailure> {
        self.state.lock().unwrap().failures.clone()
    }

    /// Every job status persisted so far, in order.
    pub fn job_status_history(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.state
            .lock()
            .unwrap()
            .job_status_saves
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Makes every subsequent `save_task` of this task fail.
    pub fn fail_task_saves(&self, task_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .failing_task_saves
            .insert(task_id);
    }
}

fn set_task_status(task: &mut Task, status: TaskStatus, activity: &str) {
    if status.releases_worker() {
        task.worker_id = None;
    }
    task.status = status;
    task.activity = activity.to_string();
    task.updated_at = Utc::now();
}

#[async_trait]
impl JobRepository for MockStore {
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> SchedulerResult<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn save_job_status(&self, job: &Job) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or(SchedulerError::JobNotFound { id: job.id })?;
        stored.status = job.status;
        stored.activity = job.activity.clone();
        stored.updated_at = Utc::now();
        state.job_status_saves.push((job.id, job.status));
        Ok(())
    }

    async fn fetch_jobs_in_status(&self, statuses: &[JobStatus]) -> SchedulerResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn job_has_tasks_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .any(|task| task.job_id == job_id && statuses.contains(&task.status)))
    }

    async fn count_tasks_of_job_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<(i64, i64)> {
        let state = self.state.lock().unwrap();
        let tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| task.job_id == job_id)
            .collect();
        let in_status = tasks
            .iter()
            .filter(|task| statuses.contains(&task.status))
            .count();
        Ok((in_status as i64, tasks.len() as i64))
    }

    async fn update_job_tasks_statuses(
        &self,
        job_id: Uuid,
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        for task in state.tasks.values_mut().filter(|t| t.job_id == job_id) {
            set_task_status(task, new_status, activity);
        }
        Ok(())
    }

    async fn update_job_tasks_statuses_conditional(
        &self,
        job_id: Uuid,
        statuses_to_update: &[TaskStatus],
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        for task in state
            .tasks
            .values_mut()
            .filter(|t| t.job_id == job_id && statuses_to_update.contains(&t.status))
        {
            set_task_status(task, new_status, activity);
        }
        Ok(())
    }

    async fn clear_job_failure_list(&self, job_id: Uuid) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let job_tasks: HashSet<Uuid> = state
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .map(|t| t.id)
            .collect();
        state.failures.retain(|f| !job_tasks.contains(&f.task_id));
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MockStore {
    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        Ok(self.state.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn fetch_tasks_of_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>> {
        let state = self.state.lock().unwrap();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn save_task(&self, task: &Task) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_task_saves.contains(&task.id) {
            return Err(SchedulerError::database_error(format!(
                "injected failure saving task {}",
                task.id
            )));
        }
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or(SchedulerError::TaskNotFound { id: task.id })?;
        stored.status = task.status;
        stored.activity = task.activity.clone();
        stored.worker_id = task.worker_id;
        stored.last_touched_at = task.last_touched_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn save_task_activity(&self, task: &Task) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or(SchedulerError::TaskNotFound { id: task.id })?;
        stored.activity = task.activity.clone();
        Ok(())
    }

    async fn fetch_tasks_of_worker_in_status(
        &self,
        worker_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.worker_id == Some(worker_id) && t.status == status)
            .cloned()
            .collect())
    }

    async fn fetch_tasks_of_worker_in_status_of_job(
        &self,
        worker_id: Uuid,
        job_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| {
                t.worker_id == Some(worker_id) && t.job_id == job_id && t.status == status
            })
            .cloned()
            .collect())
    }

    async fn task_touched_by_worker(
        &self,
        task_id: Uuid,
        at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;
        stored.last_touched_at = Some(at);
        Ok(())
    }

    async fn fetch_timed_out_tasks(
        &self,
        untouched_since: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Active
                    && t.last_touched_at.is_some_and(|at| at <= untouched_since)
            })
            .cloned()
            .collect())
    }

    async fn schedule_task(&self, worker: &Worker) -> SchedulerResult<Option<Task>> {
        let mut state = self.state.lock().unwrap();

        let schedulable = [TaskStatus::Queued, TaskStatus::SoftFailed, TaskStatus::Active];
        let mut candidates: Vec<(bool, i32, i32, DateTime<Utc>, Uuid)> = Vec::new();

        for task in state.tasks.values() {
            if !schedulable.contains(&task.status) || !worker.can_run(&task.task_type) {
                continue;
            }
            if task.worker_id.is_some_and(|id| id != worker.id) {
                continue;
            }
            let Some(job) = state.jobs.get(&task.job_id) else {
                continue;
            };
            if !job.status.is_schedulable() {
                continue;
            }
            let deps_completed = task.dependencies.iter().all(|dep| {
                state
                    .tasks
                    .get(dep)
                    .is_some_and(|d| d.status == TaskStatus::Completed)
            });
            if !deps_completed {
                continue;
            }
            let blocked = state.blocklist.iter().any(|b| {
                b.job_id == task.job_id && b.worker_id == worker.id && b.task_type == task.task_type
            });
            if blocked {
                continue;
            }
            let failed_before = state
                .failures
                .iter()
                .any(|f| f.task_id == task.id && f.worker_id == worker.id);
            if failed_before {
                continue;
            }
            candidates.push((
                task.status == TaskStatus::Active,
                job.priority,
                task.priority,
                task.created_at,
                task.id,
            ));
        }

        candidates.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(b.2.cmp(&a.2))
                .then(a.3.cmp(&b.3))
                .then(a.4.cmp(&b.4))
        });

        let Some(&(_, _, _, _, task_id)) = candidates.first() else {
            return Ok(None);
        };
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        task.worker_id = Some(worker.id);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn add_worker_to_task_failed_list(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
    ) -> SchedulerResult<i64> {
        let mut state = self.state.lock().unwrap();
        let exists = state
            .failures
            .iter()
            .any(|f| f.task_id == task_id && f.worker_id == worker_id);
        if !exists {
            state.failures.push(TaskFailure {
                task_id,
                worker_id,
                created_at: Utc::now(),
            });
        }
        let count = state.failures.iter().filter(|f| f.task_id == task_id).count();
        Ok(count as i64)
    }

    async fn fetch_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<Vec<Worker>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .failures
            .iter()
            .filter(|f| f.task_id == task_id)
            .filter_map(|f| state.workers.get(&f.worker_id).cloned())
            .collect())
    }

    async fn clear_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<()> {
        self.state
            .lock()
            .unwrap()
            .failures
            .retain(|f| f.task_id != task_id);
        Ok(())
    }
}

#[async_trait]
impl WorkerRepository for MockStore {
    async fn create_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        self.insert_worker(worker.clone());
        Ok(())
    }

    async fn get_worker(&self, id: Uuid) -> SchedulerResult<Option<Worker>> {
        Ok(self.state.lock().unwrap().workers.get(&id).cloned())
    }

    async fn fetch_workers(&self) -> SchedulerResult<Vec<Worker>> {
        let mut workers: Vec<Worker> =
            self.state.lock().unwrap().workers.values().cloned().collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workers)
    }

    async fn save_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.workers.contains_key(&worker.id) {
            return Err(SchedulerError::WorkerNotFound { id: worker.id });
        }
        let mut stored = worker.clone();
        stored.updated_at = Utc::now();
        state.workers.insert(worker.id, stored);
        Ok(())
    }

    async fn save_worker_status(&self, worker: &Worker) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .workers
            .get_mut(&worker.id)
            .ok_or(SchedulerError::WorkerNotFound { id: worker.id })?;
        stored.status = worker.status;
        stored.status_requested = worker.status_requested;
        stored.lazy_status_request = worker.lazy_status_request;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn worker_seen(&self, worker_id: Uuid, at: DateTime<Utc>) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .workers
            .get_mut(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound { id: worker_id })?;
        stored.last_seen_at = Some(at);
        Ok(())
    }

    async fn fetch_timed_out_workers(
        &self,
        last_seen_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Worker>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .workers
            .values()
            .filter(|w| {
                !matches!(w.status, WorkerStatus::Offline | WorkerStatus::Error)
                    && w.last_seen_at.is_some_and(|at| at < last_seen_before)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BlocklistRepository for MockStore {
    async fn add_worker_to_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let exists = state.blocklist.iter().any(|b| {
            b.job_id == job_id && b.worker_id == worker_id && b.task_type == task_type
        });
        if !exists {
            state.blocklist.push(JobBlock {
                job_id,
                worker_id,
                task_type: task_type.to_string(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn fetch_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<Vec<JobBlock>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .blocklist
            .iter()
            .filter(|b| b.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn remove_from_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()> {
        self.state.lock().unwrap().blocklist.retain(|b| {
            !(b.job_id == job_id && b.worker_id == worker_id && b.task_type == task_type)
        });
        Ok(())
    }

    async fn clear_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<()> {
        self.state
            .lock()
            .unwrap()
            .blocklist
            .retain(|b| b.job_id != job_id);
        Ok(())
    }

    async fn workers_left_to_run(
        &self,
        job_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<HashSet<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .workers
            .values()
            .filter(|w| w.can_run(task_type))
            .filter(|w| {
                !state.blocklist.iter().any(|b| {
                    b.job_id == job_id && b.worker_id == w.id && b.task_type == task_type
                })
            })
            .map(|w| w.id)
            .collect())
    }

    async fn count_task_failures_of_worker(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<i64> {
        let state = self.state.lock().unwrap();
        let count = state
            .failures
            .iter()
            .filter(|f| f.worker_id == worker_id)
            .filter(|f| {
                state
                    .tasks
                    .get(&f.task_id)
                    .is_some_and(|t| t.job_id == job_id && t.task_type == task_type)
            })
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl SleepScheduleRepository for MockStore {
    async fn fetch_worker_sleep_schedule(
        &self,
        worker_id: Uuid,
    ) -> SchedulerResult<Option<SleepSchedule>> {
        Ok(self.schedule(worker_id))
    }

    async fn set_worker_sleep_schedule(&self, schedule: &SleepSchedule) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.workers.contains_key(&schedule.worker_id) {
            return Err(SchedulerError::WorkerNotFound {
                id: schedule.worker_id,
            });
        }
        state.schedules.insert(schedule.worker_id, schedule.clone());
        Ok(())
    }

    async fn set_worker_sleep_schedule_next_check(
        &self,
        schedule: &SleepSchedule,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state.schedules.get_mut(&schedule.worker_id) {
            stored.next_check = schedule.next_check;
        }
        Ok(())
    }

    async fn fetch_sleep_schedules_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<SleepSchedule>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .schedules
            .values()
            .filter(|s| s.is_active && s.next_check.map_or(true, |next| next <= now))
            .cloned()
            .collect())
    }
}

/// Broadcaster that records every event it is asked to send
#[derive(Debug, Clone, Default)]
pub struct RecordingBroadcaster {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn job_updates(&self) -> Vec<JobUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChangeEvent::Job(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn task_updates(&self) -> Vec<TaskUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChangeEvent::Task(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn worker_updates(&self) -> Vec<WorkerUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChangeEvent::Worker(update) => Some(update),
                _ => None,
            })
            .collect()
    }
}

impl ChangeBroadcaster for RecordingBroadcaster {
    fn broadcast_job_update(&self, update: JobUpdate) {
        self.events.lock().unwrap().push(ChangeEvent::Job(update));
    }

    fn broadcast_task_update(&self, update: TaskUpdate) {
        self.events.lock().unwrap().push(ChangeEvent::Task(update));
    }

    fn broadcast_worker_update(&self, update: WorkerUpdate) {
        self.events.lock().unwrap().push(ChangeEvent::Worker(update));
    }
}

/// A single line written to a task log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLogLine {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub text: String,
}

/// Task log sink that keeps lines in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingTaskLog {
    lines: Arc<Mutex<Vec<TaskLogLine>>>,
}

impl RecordingTaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<TaskLogLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_of_task(&self, task_id: Uuid) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.task_id == task_id)
            .map(|l| l.text)
            .collect()
    }
}

#[async_trait]
impl TaskLogSink for RecordingTaskLog {
    async fn write_timestamped(
        &self,
        job_id: Uuid,
        task_id: Uuid,
        text: &str,
    ) -> SchedulerResult<()> {
        self.lines.lock().unwrap().push(TaskLogLine {
            job_id,
            task_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Manually driven clock
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
