use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub platform: String,
    pub software: String,
    pub status: WorkerStatus,
    /// 待Worker执行的状态切换请求
    pub status_requested: Option<WorkerStatus>,
    /// 为 true 时Worker可以在当前任务结束后再切换状态
    pub lazy_status_request: bool,
    pub supported_task_types: Vec<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(name: String, supported_task_types: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            address: String::new(),
            platform: String::new(),
            software: String::new(),
            status: WorkerStatus::Offline,
            status_requested: None,
            lazy_status_request: false,
            supported_task_types,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 日志中使用的标识 `名称 (UUID)`
    pub fn identifier(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    pub fn status_change_request(&mut self, status: WorkerStatus, is_lazy: bool) {
        self.status_requested = Some(status);
        self.lazy_status_request = is_lazy;
    }

    pub fn status_change_clear(&mut self) {
        self.status_requested = None;
        self.lazy_status_request = false;
    }

    pub fn can_run(&self, task_type: &str) -> bool {
        self.supported_task_types.iter().any(|t| t == task_type)
    }
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStatus {
    Offline,
    Starting,
    Awake,
    Asleep,
    Error,
}

impl WorkerStatus {
    pub const ALL: [WorkerStatus; 5] = [
        WorkerStatus::Offline,
        WorkerStatus::Starting,
        WorkerStatus::Awake,
        WorkerStatus::Asleep,
        WorkerStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Offline => "offline",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Awake => "awake",
            WorkerStatus::Asleep => "asleep",
            WorkerStatus::Error => "error",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::Serialization(format!("无效的Worker状态: {s}")))
    }
}

impl_sqlite_text_type!(WorkerStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier() {
        let worker = Worker::new("wrk-01".to_string(), vec!["blender".to_string()]);
        assert_eq!(worker.identifier(), format!("wrk-01 ({})", worker.id));
    }

    #[test]
    fn test_status_change_request_and_clear() {
        let mut worker = Worker::new("wrk-01".to_string(), vec![]);
        worker.status_change_request(WorkerStatus::Asleep, true);
        assert_eq!(worker.status_requested, Some(WorkerStatus::Asleep));
        assert!(worker.lazy_status_request);

        worker.status_change_clear();
        assert_eq!(worker.status_requested, None);
        assert!(!worker.lazy_status_request);
    }

    #[test]
    fn test_can_run() {
        let worker = Worker::new(
            "wrk-01".to_string(),
            vec!["blender".to_string(), "ffmpeg".to_string()],
        );
        assert!(worker.can_run("ffmpeg"));
        assert!(!worker.can_run("misc"));
    }
}
