use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;

/// 任务定义
///
/// 作业内的最小执行单元，随作业批量创建。
///
/// # 字段说明
///
/// - `worker_id`: 当前分配到的Worker，只由调度器修改
/// - `dependencies`: 同一作业内的前置任务，全部完成后本任务才可调度
/// - `last_touched_at`: Worker最近一次汇报进度的时间，用于超时检测
/// - `activity`: 面向用户的当前活动描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub task_type: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub worker_id: Option<Uuid>,
    pub dependencies: Vec<Uuid>,
    pub last_touched_at: Option<DateTime<Utc>>,
    pub activity: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(job_id: Uuid, name: String, task_type: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            name,
            task_type,
            priority,
            status: TaskStatus::Queued,
            worker_id: None,
            dependencies: Vec::new(),
            last_touched_at: None,
            activity: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    SoftFailed,
    Failed,
    CancelRequested,
    Canceled,
    Paused,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Queued,
        TaskStatus::Active,
        TaskStatus::Completed,
        TaskStatus::SoftFailed,
        TaskStatus::Failed,
        TaskStatus::CancelRequested,
        TaskStatus::Canceled,
        TaskStatus::Paused,
    ];

    /// 仍在运行或将来可能运行的状态
    pub const RUNNABLE: [TaskStatus; 3] =
        [TaskStatus::Active, TaskStatus::Queued, TaskStatus::SoftFailed];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::SoftFailed => "soft-failed",
            TaskStatus::Failed => "failed",
            TaskStatus::CancelRequested => "cancel-requested",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Paused => "paused",
        }
    }

    pub fn is_runnable(&self) -> bool {
        TaskStatus::RUNNABLE.contains(self)
    }

    /// 进入该状态的任务不再为原Worker保留，其他Worker可以领取
    pub fn releases_worker(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::SoftFailed)
    }

    /// 预期的状态迁移，除 `completed` 外任何状态都可以回到 `queued`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if next == Queued {
            return *self != Queued;
        }
        match self {
            Queued => matches!(
                next,
                Active | SoftFailed | Failed | CancelRequested | Canceled | Paused
            ),
            Active => matches!(
                next,
                Completed | SoftFailed | Failed | CancelRequested | Canceled | Paused
            ),
            SoftFailed => matches!(
                next,
                Active | SoftFailed | Failed | CancelRequested | Canceled | Paused
            ),
            CancelRequested => matches!(next, Canceled | Failed | Completed),
            Paused => matches!(next, CancelRequested | Canceled),
            Completed | Failed | Canceled => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::Serialization(format!("无效的任务状态: {s}")))
    }
}

impl_sqlite_text_type!(TaskStatus);
