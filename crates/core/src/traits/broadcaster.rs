use crate::models::{JobUpdate, TaskUpdate, WorkerUpdate};

/// 变更通知广播
///
/// 发出即忘：实现不得阻塞，发送失败也不能影响编排操作。
pub trait ChangeBroadcaster: Send + Sync {
    fn broadcast_job_update(&self, update: JobUpdate);

    fn broadcast_task_update(&self, update: TaskUpdate);

    fn broadcast_worker_update(&self, update: WorkerUpdate);
}
