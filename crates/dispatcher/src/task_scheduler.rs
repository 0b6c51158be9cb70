use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use farm_core::{
    models::{Task, TaskStatus, Worker},
    traits::{Clock, TaskRepository, WorkerRepository},
    SchedulerResult,
};

use crate::state_machine::TaskStateMachine;

/// 为请求工作的Worker挑选任务
///
/// 查找和分配由存储层在一个事务内完成；这里只负责把选中的任务
/// 通过状态机切换为 `active`，以及记录Worker和任务的活跃时间。
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    state_machine: Arc<dyn TaskStateMachine>,
    clock: Arc<dyn Clock>,
}

impl TaskScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        state_machine: Arc<dyn TaskStateMachine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            state_machine,
            clock,
        }
    }

    /// 为Worker分配一个任务，没有可运行的任务时返回 `Ok(None)`
    pub async fn schedule_task(&self, worker: &Worker) -> SchedulerResult<Option<Task>> {
        let now = self.clock.now();
        if let Err(e) = self.worker_repo.worker_seen(worker.id, now).await {
            warn!(worker = %worker.identifier(), "更新Worker活跃时间失败: {}", e);
        }

        let Some(mut task) = self.task_repo.schedule_task(worker).await? else {
            debug!(worker = %worker.identifier(), "没有可分配给Worker的任务");
            return Ok(None);
        };

        task.last_touched_at = Some(now);

        if task.status == TaskStatus::Active {
            // Worker重连后继续执行原来的任务
            info!(
                worker = %worker.identifier(),
                task_id = %task.id,
                "重新分配Worker已在执行的任务"
            );
            self.task_repo.task_touched_by_worker(task.id, now).await?;
            return Ok(Some(task));
        }

        info!(
            worker = %worker.identifier(),
            task_id = %task.id,
            job_id = %task.job_id,
            task_type = %task.task_type,
            "任务已分配给Worker"
        );
        self.state_machine
            .task_status_change(&mut task, TaskStatus::Active)
            .await?;
        Ok(Some(task))
    }

    /// 记录Worker仍在处理该任务
    pub async fn task_touched_by_worker(&self, task_id: Uuid) -> SchedulerResult<()> {
        self.task_repo
            .task_touched_by_worker(task_id, self.clock.now())
            .await
    }

    pub async fn worker_seen(&self, worker_id: Uuid) -> SchedulerResult<()> {
        self.worker_repo
            .worker_seen(worker_id, self.clock.now())
            .await
    }
}
