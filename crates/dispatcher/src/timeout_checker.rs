use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use farm_core::{
    config::OrchestratorConfig,
    models::{Task, TaskStatus, Worker, WorkerStatus, WorkerUpdate},
    traits::{ChangeBroadcaster, Clock, TaskLogSink, TaskRepository, WorkerRepository},
    SchedulerResult,
};

use crate::state_machine::TaskStateMachine;

const UNASSIGNED_WORKER: &str = "-unassigned-";
const UNKNOWN_WORKER: &str = "-unknown-";

/// 超时检测器
///
/// 周期性地把长时间未被Worker触达的 `active` 任务标记为失败，
/// 并把长时间没有联系的Worker标记为 `error`、重新排队其任务。
pub struct TimeoutChecker {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    state_machine: Arc<dyn TaskStateMachine>,
    broadcaster: Arc<dyn ChangeBroadcaster>,
    task_log: Arc<dyn TaskLogSink>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl TimeoutChecker {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        state_machine: Arc<dyn TaskStateMachine>,
        broadcaster: Arc<dyn ChangeBroadcaster>,
        task_log: Arc<dyn TaskLogSink>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            state_machine,
            broadcaster,
            task_log,
            clock,
            config,
        }
    }

    /// 运行检测循环，直到收到关闭信号
    ///
    /// 关闭信号只会取消下一次检测，进行中的检测总会完整执行。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.config.task_timeout_seconds == 0 {
            warn!("任务超时时间为0，不检测任务超时");
        }
        if self.config.worker_timeout_seconds == 0 {
            warn!("Worker超时时间为0，不检测Worker超时");
        }

        info!(
            initial_sleep = ?self.config.timeout_initial_sleep(),
            interval = ?self.config.timeout_check_interval(),
            "启动超时检测器"
        );

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("收到关闭信号，超时检测器退出");
                return;
            }
            _ = tokio::time::sleep(self.config.timeout_initial_sleep()) => {}
        }

        loop {
            self.check_timeouts().await;

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，超时检测器退出");
                    return;
                }
                _ = tokio::time::sleep(self.config.timeout_check_interval()) => {}
            }
        }
    }

    /// 执行一次任务和Worker的超时检测
    pub async fn check_timeouts(&self) {
        trace!("执行超时检测");

        if self.config.task_timeout_seconds > 0 {
            if let Err(e) = self.check_tasks().await {
                error!("检测任务超时出错: {}", e);
            }
        }
        if self.config.worker_timeout_seconds > 0 {
            if let Err(e) = self.check_workers().await {
                error!("检测Worker超时出错: {}", e);
            }
        }
    }

    async fn check_tasks(&self) -> SchedulerResult<()> {
        let threshold = timeout_threshold(self.clock.now(), self.config.task_timeout());
        let tasks = self.task_repo.fetch_timed_out_tasks(threshold).await?;

        if tasks.is_empty() {
            trace!("没有超时的任务");
            return Ok(());
        }

        info!("发现 {} 个超时任务", tasks.len());
        for mut task in tasks {
            self.time_out_task(&mut task).await;
        }
        Ok(())
    }

    async fn time_out_task(&self, task: &mut Task) {
        let ident = self.assigned_worker_ident(task).await;
        warn!(task_id = %task.id, worker = %ident, "任务超时");

        task.activity = format!("Task timed out on worker {ident}");
        if let Err(e) = self
            .state_machine
            .task_status_change(task, TaskStatus::Failed)
            .await
        {
            error!(task_id = %task.id, "把超时任务标记为失败时出错: {}", e);
        }

        let untouched_since = task
            .last_touched_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        let log_text = format!(
            "Task timed out. It was assigned to worker {ident}, but untouched since {untouched_since}"
        );
        if let Err(e) = self
            .task_log
            .write_timestamped(task.job_id, task.id, &log_text)
            .await
        {
            warn!(task_id = %task.id, "写入任务日志失败: {}", e);
        }
    }

    async fn assigned_worker_ident(&self, task: &Task) -> String {
        let Some(worker_id) = task.worker_id else {
            return UNASSIGNED_WORKER.to_string();
        };

        match self.worker_repo.get_worker(worker_id).await {
            Ok(Some(worker)) => worker.identifier(),
            Ok(None) => {
                warn!(task_id = %task.id, %worker_id, "超时任务分配的Worker不存在");
                UNKNOWN_WORKER.to_string()
            }
            Err(e) => {
                warn!(task_id = %task.id, %worker_id, "查询超时任务的Worker出错: {}", e);
                UNKNOWN_WORKER.to_string()
            }
        }
    }

    async fn check_workers(&self) -> SchedulerResult<()> {
        let threshold = timeout_threshold(self.clock.now(), self.config.worker_timeout());
        let workers = self.worker_repo.fetch_timed_out_workers(threshold).await?;

        if workers.is_empty() {
            trace!("没有超时的Worker");
            return Ok(());
        }

        info!("发现 {} 个超时Worker", workers.len());
        for mut worker in workers {
            self.time_out_worker(&mut worker).await;
        }
        Ok(())
    }

    async fn time_out_worker(&self, worker: &mut Worker) {
        warn!(
            worker = %worker.identifier(),
            last_seen_at = ?worker.last_seen_at,
            "Worker超时"
        );

        let previous_status = worker.status;
        worker.status_change_clear();
        worker.status = WorkerStatus::Error;

        if let Err(e) = self.worker_repo.save_worker_status(worker).await {
            error!(worker = %worker.identifier(), "保存超时Worker状态出错: {}", e);
        }

        if let Err(e) = self
            .state_machine
            .requeue_tasks_of_worker(worker, "worker timed out")
            .await
        {
            error!(worker = %worker.identifier(), "重新排队超时Worker的任务出错: {}", e);
        }

        debug!(worker = %worker.identifier(), "广播Worker超时");
        self.broadcaster
            .broadcast_worker_update(WorkerUpdate::new(worker).with_previous_status(previous_status));
    }
}

/// 早于该时间点即视为超时
fn timeout_threshold(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
