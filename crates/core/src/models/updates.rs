use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Job, JobStatus, Task, TaskStatus, Worker, WorkerStatus};

/// 作业变更通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdate {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub priority: i32,
    pub previous_status: Option<JobStatus>,
    pub status: JobStatus,
    pub activity: String,
    /// 发生了批量任务更新，订阅方应重新拉取全部任务而不是依赖单个任务通知
    pub refresh_tasks: bool,
    pub updated: DateTime<Utc>,
}

impl JobUpdate {
    pub fn new(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            job_type: job.job_type.clone(),
            priority: job.priority,
            previous_status: None,
            status: job.status,
            activity: job.activity.clone(),
            refresh_tasks: false,
            updated: job.updated_at,
        }
    }

    pub fn with_previous_status(mut self, previous: JobStatus) -> Self {
        self.previous_status = Some(previous);
        self
    }

    pub fn with_refresh_tasks(mut self, refresh: bool) -> Self {
        self.refresh_tasks = refresh;
        self
    }
}

/// 任务变更通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskUpdate {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub previous_status: Option<TaskStatus>,
    pub status: TaskStatus,
    pub activity: String,
    pub worker_id: Option<Uuid>,
    pub updated: DateTime<Utc>,
}

impl TaskUpdate {
    pub fn new(task: &Task) -> Self {
        Self {
            id: task.id,
            job_id: task.job_id,
            name: task.name.clone(),
            previous_status: None,
            status: task.status,
            activity: task.activity.clone(),
            worker_id: task.worker_id,
            updated: task.updated_at,
        }
    }

    pub fn with_previous_status(mut self, previous: TaskStatus) -> Self {
        self.previous_status = Some(previous);
        self
    }
}

/// Worker状态切换请求
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStatusChangeRequest {
    pub status: WorkerStatus,
    pub is_lazy: bool,
}

/// Worker变更通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerUpdate {
    pub id: Uuid,
    pub name: String,
    pub previous_status: Option<WorkerStatus>,
    pub status: WorkerStatus,
    pub status_change: Option<WorkerStatusChangeRequest>,
    pub last_seen: Option<DateTime<Utc>>,
    pub version: String,
    pub updated: DateTime<Utc>,
}

impl WorkerUpdate {
    pub fn new(worker: &Worker) -> Self {
        Self {
            id: worker.id,
            name: worker.name.clone(),
            previous_status: None,
            status: worker.status,
            status_change: worker
                .status_requested
                .map(|status| WorkerStatusChangeRequest {
                    status,
                    is_lazy: worker.lazy_status_request,
                }),
            last_seen: worker.last_seen_at,
            version: worker.software.clone(),
            updated: worker.updated_at,
        }
    }

    pub fn with_previous_status(mut self, previous: WorkerStatus) -> Self {
        self.previous_status = Some(previous);
        self
    }
}

/// 广播通道上传递的变更事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    Job(JobUpdate),
    Task(TaskUpdate),
    Worker(WorkerUpdate),
}
