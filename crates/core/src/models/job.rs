use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;
use crate::models::TaskStatus;

/// 渲染作业
///
/// 由外部作业编译器创建，包含若干任务。状态只由状态机修改，核心从不删除作业。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    /// 数值越大越先运行
    pub priority: i32,
    pub status: JobStatus,
    /// 最近一次状态变更的可读原因
    pub activity: String,
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(name: String, job_type: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            job_type,
            priority,
            status: JobStatus::UnderConstruction,
            activity: String::new(),
            settings: serde_json::Map::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 作业状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    UnderConstruction,
    Queued,
    Active,
    Completed,
    CancelRequested,
    Canceled,
    Failed,
    Requeued,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::UnderConstruction,
        JobStatus::Queued,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::CancelRequested,
        JobStatus::Canceled,
        JobStatus::Failed,
        JobStatus::Requeued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::UnderConstruction => "under-construction",
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::CancelRequested => "cancel-requested",
            JobStatus::Canceled => "canceled",
            JobStatus::Failed => "failed",
            JobStatus::Requeued => "requeued",
        }
    }

    /// 调度器只从这些状态的作业中挑选任务
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            JobStatus::Active | JobStatus::Queued | JobStatus::Requeued
        )
    }

    /// 预期的状态迁移
    ///
    /// 状态机不拒绝表外迁移（由调用方决定目标状态），只记录警告。
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            UnderConstruction => matches!(next, Queued | Requeued | CancelRequested | Failed),
            Queued => matches!(
                next,
                Active | Completed | CancelRequested | Failed | Requeued
            ),
            Active => matches!(next, Completed | CancelRequested | Failed | Requeued),
            CancelRequested => matches!(next, Canceled | Failed | Requeued),
            Completed | Canceled | Failed => matches!(next, Requeued),
            Requeued => matches!(next, Queued | CancelRequested | Failed),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::Serialization(format!("无效的作业状态: {s}")))
    }
}

impl_sqlite_text_type!(JobStatus);

/// 作业状态变更引发的批量任务状态更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMassUpdate {
    /// `None` 表示作业的全部任务
    pub only_statuses: Option<Vec<TaskStatus>>,
    pub new_status: TaskStatus,
    pub activity: String,
    /// 同时清空作业的任务失败记录，使重试次数重新计算
    pub clear_failures: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&JobStatus::CancelRequested).unwrap();
        assert_eq!(json, "\"cancel-requested\"");
        let status: JobStatus = serde_json::from_str("\"under-construction\"").unwrap();
        assert_eq!(status, JobStatus::UnderConstruction);
    }

    #[test]
    fn test_transition_table() {
        assert!(JobStatus::Completed.can_transition_to(JobStatus::Requeued));
        assert!(JobStatus::Requeued.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::CancelRequested.can_transition_to(JobStatus::Canceled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Active));
        assert!(!JobStatus::Canceled.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_schedulable_statuses() {
        let schedulable: Vec<JobStatus> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_schedulable)
            .collect();
        assert_eq!(
            schedulable,
            vec![JobStatus::Queued, JobStatus::Active, JobStatus::Requeued]
        );
    }
}
