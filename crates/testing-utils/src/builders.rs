//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use farm_core::models::{
    Job, JobStatus, SleepSchedule, Task, TaskStatus, TimeOfDay, Worker, WorkerStatus,
};
use uuid::Uuid;

/// Builder for creating test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            job: Job {
                id: Uuid::new_v4(),
                name: "test_job".to_string(),
                job_type: "simple-blender-render".to_string(),
                priority: 50,
                status: JobStatus::Queued,
                activity: String::new(),
                settings: serde_json::Map::new(),
                metadata: HashMap::new(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.job.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.job.settings.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(job_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: Uuid::new_v4(),
                job_id,
                name: "test_task".to_string(),
                task_type: "blender".to_string(),
                priority: 50,
                status: TaskStatus::Queued,
                worker_id: None,
                dependencies: vec![],
                last_touched_at: None,
                activity: String::new(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Task belonging to `job`.
    pub fn for_job(job: &Job) -> Self {
        Self::new(job.id)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_worker(mut self, worker_id: Uuid) -> Self {
        self.task.worker_id = Some(worker_id);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.task.dependencies = dependencies;
        self
    }

    pub fn with_last_touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_touched_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self.task.updated_at = at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for creating test Worker entities
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            worker: Worker {
                id: Uuid::new_v4(),
                name: "test_worker".to_string(),
                address: "192.168.1.100".to_string(),
                platform: "linux".to_string(),
                software: "3.0".to_string(),
                status: WorkerStatus::Awake,
                status_requested: None,
                lazy_status_request: false,
                supported_task_types: vec![
                    "blender".to_string(),
                    "ffmpeg".to_string(),
                    "file-management".to_string(),
                    "misc".to_string(),
                ],
                last_seen_at: Some(now),
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.worker.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.worker.name = name.to_string();
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.worker.status = status;
        self
    }

    pub fn with_status_request(mut self, status: WorkerStatus, is_lazy: bool) -> Self {
        self.worker.status_change_request(status, is_lazy);
        self
    }

    pub fn with_task_types(mut self, task_types: &[&str]) -> Self {
        self.worker.supported_task_types = task_types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_last_seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.worker.last_seen_at = Some(at);
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test SleepSchedule entities
pub struct SleepScheduleBuilder {
    schedule: SleepSchedule,
}

impl SleepScheduleBuilder {
    pub fn new(worker_id: Uuid) -> Self {
        Self {
            schedule: SleepSchedule {
                worker_id,
                is_active: true,
                days_of_week: String::new(),
                start_time: None,
                end_time: None,
                next_check: None,
            },
        }
    }

    pub fn inactive(mut self) -> Self {
        self.schedule.is_active = false;
        self
    }

    pub fn with_days(mut self, days_of_week: &str) -> Self {
        self.schedule.days_of_week = days_of_week.to_string();
        self
    }

    /// Panics on an invalid `HH:MM` string; test inputs are literals.
    pub fn with_start(mut self, start: &str) -> Self {
        self.schedule.start_time = Some(parse_time_of_day(start));
        self
    }

    pub fn with_end(mut self, end: &str) -> Self {
        self.schedule.end_time = Some(parse_time_of_day(end));
        self
    }

    pub fn with_next_check(mut self, next_check: DateTime<Utc>) -> Self {
        self.schedule.next_check = Some(next_check);
        self
    }

    pub fn build(self) -> SleepSchedule {
        self.schedule
    }
}

fn parse_time_of_day(value: &str) -> TimeOfDay {
    value
        .parse()
        .unwrap_or_else(|e| panic!("invalid time of day {value:?}: {e}"))
}
