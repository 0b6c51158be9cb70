use async_trait::async_trait;
use uuid::Uuid;

use crate::SchedulerResult;

/// 任务日志写入
#[async_trait]
pub trait TaskLogSink: Send + Sync {
    /// 在任务日志末尾追加一行带时间戳的文本
    async fn write_timestamped(&self, job_id: Uuid, task_id: Uuid, text: &str)
        -> SchedulerResult<()>;
}
