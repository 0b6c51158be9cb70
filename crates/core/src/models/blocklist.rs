use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业黑名单条目：禁止某Worker运行该作业中某类型的任务
///
/// (job_id, worker_id, task_type) 唯一，只创建和删除，不更新。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobBlock {
    pub job_id: Uuid,
    pub worker_id: Uuid,
    pub task_type: String,
    pub created_at: DateTime<Utc>,
}

/// 某Worker执行某任务失败的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: Uuid,
    pub worker_id: Uuid,
    pub created_at: DateTime<Utc>,
}
