use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use farm_core::{
    config::OrchestratorConfig,
    models::{Job, JobStatus, JobUpdate, Task, TaskMassUpdate, TaskStatus, TaskUpdate, Worker},
    traits::{ChangeBroadcaster, JobRepository, TaskLogSink, TaskRepository},
    SchedulerError, SchedulerResult,
};

/// 一次 `job_status_change` 调用内最多允许的连续迁移次数
///
/// 正常情况下 2 到 3 次即收敛（如 requeued -> queued -> completed）。
const MAX_JOB_TRANSITIONS: usize = 8;

/// 重新排队作业时会被放回队列的未完成任务状态
const NON_COMPLETED_STATUSES: [TaskStatus; 5] = [
    TaskStatus::CancelRequested,
    TaskStatus::Canceled,
    TaskStatus::Failed,
    TaskStatus::Paused,
    TaskStatus::SoftFailed,
];

/// 任务状态与作业状态的唯一修改入口
#[async_trait]
pub trait TaskStateMachine: Send + Sync {
    /// 保存任务的新状态并处理对所属作业的影响
    async fn task_status_change(&self, task: &mut Task, new_status: TaskStatus)
        -> SchedulerResult<()>;

    /// 修改作业状态并执行由此引发的批量任务更新，直到作业状态稳定
    async fn job_status_change(
        &self,
        job: &mut Job,
        new_status: JobStatus,
        reason: &str,
    ) -> SchedulerResult<()>;

    /// 把Worker当前 `active` 的任务放回队列
    ///
    /// 单个任务出错不会中断处理，返回最后一个错误。
    async fn requeue_tasks_of_worker(&self, worker: &Worker, reason: &str) -> SchedulerResult<()>;

    /// 把该Worker在此作业中硬失败的任务放回队列
    async fn requeue_failed_tasks_of_worker_of_job(
        &self,
        worker: &Worker,
        job_id: Uuid,
        reason: &str,
    ) -> SchedulerResult<()>;
}

/// 任务状态变更后对所属作业的后续处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFollowUp {
    /// 对作业没有影响
    Nothing,
    /// 作业已完成时重新排队作业
    RequeueJobIfCompleted,
    /// 作业中没有可运行任务时取消作业
    CancelJobIfNothingRunnable,
    /// 按失败任务占比决定作业是否失败
    CheckFailureRatio,
    /// 作业尚未 active 时激活作业
    ActivateJob,
    /// 所有任务完成时完成作业
    CheckCompletion,
}

pub fn job_follow_up(new_task_status: TaskStatus) -> JobFollowUp {
    match new_task_status {
        TaskStatus::Queued => JobFollowUp::RequeueJobIfCompleted,
        TaskStatus::CancelRequested | TaskStatus::Paused => JobFollowUp::Nothing,
        TaskStatus::Canceled => JobFollowUp::CancelJobIfNothingRunnable,
        TaskStatus::Failed => JobFollowUp::CheckFailureRatio,
        TaskStatus::Active | TaskStatus::SoftFailed => JobFollowUp::ActivateJob,
        TaskStatus::Completed => JobFollowUp::CheckCompletion,
    }
}

/// 作业迁移到新状态后的下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextJobStep {
    Stop,
    Transition(JobStatus),
    /// 检查是否所有任务都已完成
    CheckCompletion,
}

/// 作业迁移对应的批量任务更新及后续步骤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MassUpdatePlan {
    pub task_update: Option<TaskMassUpdate>,
    pub next: NextJobStep,
}

/// 计算作业从 `old_status` 迁移到 `new_status` 时需要的批量任务更新
pub fn plan_mass_update(new_status: JobStatus, old_status: JobStatus) -> MassUpdatePlan {
    match new_status {
        JobStatus::UnderConstruction
        | JobStatus::Active
        | JobStatus::Completed
        | JobStatus::Canceled => MassUpdatePlan {
            task_update: None,
            next: NextJobStep::Stop,
        },

        JobStatus::CancelRequested | JobStatus::Failed => MassUpdatePlan {
            task_update: Some(TaskMassUpdate {
                only_statuses: Some(TaskStatus::RUNNABLE.to_vec()),
                new_status: TaskStatus::Canceled,
                activity: format!(
                    "Manager cancelled this task because the job got status \"{new_status}\"."
                ),
                clear_failures: false,
            }),
            next: if new_status == JobStatus::CancelRequested {
                NextJobStep::Transition(JobStatus::Canceled)
            } else {
                NextJobStep::Stop
            },
        },

        JobStatus::Requeued => {
            let activity =
                format!("Queued because job transitioned status from \"{old_status}\" to \"{new_status}\"");
            let task_update = match old_status {
                // 刚编译完的作业，任务本来就是 queued
                JobStatus::UnderConstruction => None,
                JobStatus::Completed => Some(TaskMassUpdate {
                    only_statuses: None,
                    new_status: TaskStatus::Queued,
                    activity,
                    clear_failures: true,
                }),
                _ => Some(TaskMassUpdate {
                    only_statuses: Some(NON_COMPLETED_STATUSES.to_vec()),
                    new_status: TaskStatus::Queued,
                    activity,
                    clear_failures: true,
                }),
            };
            MassUpdatePlan {
                task_update,
                next: NextJobStep::Transition(JobStatus::Queued),
            }
        }

        JobStatus::Queued => MassUpdatePlan {
            task_update: None,
            next: NextJobStep::CheckCompletion,
        },
    }
}

/// 失败任务占比（向下取整的百分数）
pub fn failed_percentage(num_failed: i64, num_total: i64) -> i64 {
    if num_total <= 0 {
        return 0;
    }
    num_failed * 100 / num_total
}

/// 任务/作业状态机
pub struct StateMachine {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    broadcaster: Arc<dyn ChangeBroadcaster>,
    task_log: Arc<dyn TaskLogSink>,
    config: OrchestratorConfig,
}

impl StateMachine {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        broadcaster: Arc<dyn ChangeBroadcaster>,
        task_log: Arc<dyn TaskLogSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            broadcaster,
            task_log,
            config,
        }
    }

    async fn fetch_job_of_task(&self, task: &Task) -> SchedulerResult<Job> {
        match self.job_repo.get_job(task.job_id).await? {
            Some(job) => Ok(job),
            None => {
                error!(
                    task_id = %task.id,
                    job_id = %task.job_id,
                    "任务没有所属作业，无法处理"
                );
                Err(SchedulerError::integrity_error(format!(
                    "任务 {} 所属的作业 {} 不存在",
                    task.id, task.job_id
                )))
            }
        }
    }

    /// 根据任务的新状态更新所属作业
    async fn update_job_after_task_status_change(
        &self,
        job: &mut Job,
        task: &Task,
    ) -> SchedulerResult<()> {
        match job_follow_up(task.status) {
            JobFollowUp::Nothing => Ok(()),

            JobFollowUp::RequeueJobIfCompleted => {
                if job.status != JobStatus::Completed {
                    return Ok(());
                }
                info!(job_id = %job.id, task_id = %task.id, "已完成作业中的任务被重新排队，作业随之重新排队");
                self.job_status_change(job, JobStatus::Requeued, "task was queued")
                    .await
            }

            JobFollowUp::CancelJobIfNothingRunnable => self.on_task_canceled(job).await,

            JobFollowUp::CheckFailureRatio => self.on_task_failed(job).await,

            JobFollowUp::ActivateJob => {
                self.activate_job(job, "a task of the job became active").await
            }

            JobFollowUp::CheckCompletion => self.on_task_completed(job).await,
        }
    }

    async fn activate_job(&self, job: &mut Job, reason: &str) -> SchedulerResult<()> {
        if matches!(job.status, JobStatus::Active | JobStatus::CancelRequested) {
            return Ok(());
        }
        info!(job_id = %job.id, "作业因任务状态变化而变为active");
        self.job_status_change(job, JobStatus::Active, reason).await
    }

    /// 作业中没有待运行任务时取消作业
    ///
    /// 这里的待运行在 active/queued/soft-failed 之外有意包含 `cancel-requested`：
    /// 这类任务仍在Worker上收尾，作业要等它们结束后才能取消。
    async fn on_task_canceled(&self, job: &mut Job) -> SchedulerResult<()> {
        if matches!(
            job.status,
            JobStatus::Canceled | JobStatus::Failed | JobStatus::Completed
        ) {
            return Ok(());
        }

        let mut pending = TaskStatus::RUNNABLE.to_vec();
        pending.push(TaskStatus::CancelRequested);
        if self.job_repo.job_has_tasks_in_status(job.id, &pending).await? {
            return Ok(());
        }

        info!(job_id = %job.id, "作业中已没有可运行的任务，取消作业");
        self.job_status_change(job, JobStatus::Canceled, "no more runnable tasks")
            .await
    }

    async fn on_task_failed(&self, job: &mut Job) -> SchedulerResult<()> {
        if job.status == JobStatus::Failed {
            return Ok(());
        }

        let (num_failed, num_total) = self
            .job_repo
            .count_tasks_of_job_in_status(job.id, &[TaskStatus::Failed])
            .await?;
        let percentage = failed_percentage(num_failed, num_total);
        let threshold = i64::from(self.config.task_fail_job_percentage);

        if percentage >= threshold {
            info!(
                job_id = %job.id,
                num_failed,
                num_total,
                percentage,
                threshold,
                "失败任务过多，作业失败"
            );
            let reason = format!("{num_failed} of {num_total} tasks failed");
            return self.job_status_change(job, JobStatus::Failed, &reason).await;
        }

        debug!(
            job_id = %job.id,
            num_failed,
            num_total,
            percentage,
            threshold,
            "任务失败，但未达到作业失败阈值"
        );
        self.activate_job(job, "a task of the job failed").await
    }

    async fn on_task_completed(&self, job: &mut Job) -> SchedulerResult<()> {
        let (num_completed, num_total) = self
            .job_repo
            .count_tasks_of_job_in_status(job.id, &[TaskStatus::Completed])
            .await?;

        if num_completed == num_total {
            info!(job_id = %job.id, "作业的所有任务都已完成");
            return self
                .job_status_change(job, JobStatus::Completed, "all tasks completed")
                .await;
        }

        debug!(
            job_id = %job.id,
            num_completed,
            num_total,
            "任务完成，作业还有剩余任务"
        );
        if job.status == JobStatus::Queued {
            return self
                .job_status_change(job, JobStatus::Active, "a task of the job completed")
                .await;
        }
        Ok(())
    }

    /// 作业是否所有任务都已完成，是则返回下一状态 `completed`
    async fn completion_status(&self, job: &Job) -> SchedulerResult<Option<JobStatus>> {
        let (num_completed, num_total) = self
            .job_repo
            .count_tasks_of_job_in_status(job.id, &[TaskStatus::Completed])
            .await?;

        if num_completed < num_total {
            debug!(
                job_id = %job.id,
                num_completed,
                num_total,
                "作业尚有未完成的任务"
            );
            return Ok(None);
        }

        info!(job_id = %job.id, "作业的所有任务都已完成，作业将变为completed");
        Ok(Some(JobStatus::Completed))
    }

    /// 持久化作业的当前状态及其批量任务更新，广播变更，返回下一目标状态
    async fn apply_job_status(
        &self,
        job: &Job,
        old_status: JobStatus,
    ) -> SchedulerResult<Option<JobStatus>> {
        let plan = plan_mass_update(job.status, old_status);

        self.job_repo
            .save_job_status_and_update_tasks(job, plan.task_update.as_ref())
            .await
            .inspect_err(|e| {
                error!(
                    job_id = %job.id,
                    "保存作业状态 {} -> {} 失败: {}",
                    old_status, job.status, e
                )
            })?;

        if let Some(update) = &plan.task_update {
            debug!(
                job_id = %job.id,
                new_task_status = %update.new_status,
                "已批量更新作业的任务"
            );
        }

        self.broadcaster.broadcast_job_update(
            JobUpdate::new(job)
                .with_previous_status(old_status)
                .with_refresh_tasks(plan.task_update.is_some()),
        );

        match plan.next {
            NextJobStep::Stop => Ok(None),
            NextJobStep::Transition(next) => Ok(Some(next)),
            NextJobStep::CheckCompletion => self.completion_status(job).await,
        }
    }

    /// 启动时自愈：重新执行停留在 `cancel-requested` 或 `requeued` 状态的作业的迁移
    pub async fn check_stuck(&self) -> SchedulerResult<()> {
        let stuck_jobs = self
            .job_repo
            .fetch_jobs_in_status(&[JobStatus::CancelRequested, JobStatus::Requeued])
            .await?;

        if stuck_jobs.is_empty() {
            debug!("没有需要重新执行状态迁移的作业");
            return Ok(());
        }

        info!("发现 {} 个状态迁移未完成的作业", stuck_jobs.len());

        for mut job in stuck_jobs {
            if let Err(e) = self.reenforce_job_status(&mut job).await {
                error!(job_id = %job.id, status = %job.status, "重新执行作业状态迁移失败: {}", e);
            }
        }
        Ok(())
    }

    async fn reenforce_job_status(&self, job: &mut Job) -> SchedulerResult<()> {
        info!(job_id = %job.id, status = %job.status, "重新执行作业状态迁移");

        let current = job.status;
        match self.apply_job_status(job, current).await? {
            Some(next) => self.job_status_change(job, next, "reenforcing status").await,
            None => Ok(()),
        }
    }

    async fn requeue_task(&self, task: &mut Task, reason: &str) -> Option<SchedulerError> {
        info!(task_id = %task.id, "重新排队任务");

        let mut last_err = None;
        task.activity = format!("Task was requeued by Manager because {reason}");
        if let Err(e) = self.task_repo.save_task_activity(task).await {
            warn!(task_id = %task.id, reason, "保存任务活动描述失败: {}", e);
            last_err = Some(e);
        }

        if let Err(e) = self.task_status_change(task, TaskStatus::Queued).await {
            warn!(task_id = %task.id, reason, "重新排队任务失败: {}", e);
            last_err = Some(e);
        }

        if let Err(e) = self
            .task_log
            .write_timestamped(task.job_id, task.id, &task.activity)
            .await
        {
            warn!(task_id = %task.id, "写入任务日志失败: {}", e);
        }
        last_err
    }
}

#[async_trait]
impl TaskStateMachine for StateMachine {
    async fn task_status_change(
        &self,
        task: &mut Task,
        new_status: TaskStatus,
    ) -> SchedulerResult<()> {
        let mut job = self.fetch_job_of_task(task).await?;

        let old_status = task.status;
        if old_status != new_status && !old_status.can_transition_to(new_status) {
            warn!(
                task_id = %task.id,
                "任务状态迁移 {} -> {} 不在预期的迁移表中",
                old_status, new_status
            );
        }
        task.status = new_status;
        if new_status.releases_worker() && old_status != new_status {
            task.worker_id = None;
        }

        debug!(
            task_id = %task.id,
            job_id = %job.id,
            old_status = %old_status,
            new_status = %new_status,
            "任务状态变更"
        );

        self.task_repo.save_task(task).await?;
        self.broadcaster
            .broadcast_task_update(TaskUpdate::new(task).with_previous_status(old_status));

        // Worker交还的任务保留失败记录，其余重新排队都重置重试次数
        if new_status == TaskStatus::Queued
            && !matches!(old_status, TaskStatus::Queued | TaskStatus::Active)
        {
            self.task_repo.clear_task_failure_list(task.id).await?;
        }

        self.update_job_after_task_status_change(&mut job, task)
            .await
    }

    async fn job_status_change(
        &self,
        job: &mut Job,
        new_status: JobStatus,
        reason: &str,
    ) -> SchedulerResult<()> {
        let mut visited = HashSet::new();
        let mut next = Some(new_status);

        while let Some(target) = next.filter(|status| *status != job.status) {
            if visited.len() >= MAX_JOB_TRANSITIONS || !visited.insert(target) {
                error!(
                    job_id = %job.id,
                    status = %job.status,
                    target = %target,
                    "作业状态迁移没有收敛: {:?}",
                    visited
                );
                return Err(SchedulerError::Internal(format!(
                    "作业 {} 的状态迁移出现循环 ({} -> {})",
                    job.id, job.status, target
                )));
            }

            let old_status = job.status;
            if !old_status.can_transition_to(target) {
                warn!(
                    job_id = %job.id,
                    "作业状态迁移 {} -> {} 不在预期的迁移表中",
                    old_status, target
                );
            }

            job.status = target;
            job.activity = format!("Changed to status \"{target}\": {reason}");

            info!(
                job_id = %job.id,
                old_status = %old_status,
                new_status = %target,
                "作业状态变更"
            );

            next = self.apply_job_status(job, old_status).await?;
        }

        Ok(())
    }

    async fn requeue_tasks_of_worker(&self, worker: &Worker, reason: &str) -> SchedulerResult<()> {
        let tasks = self
            .task_repo
            .fetch_tasks_of_worker_in_status(worker.id, TaskStatus::Active)
            .await?;

        if tasks.len() > 1 {
            warn!(
                worker = %worker.identifier(),
                num_active = tasks.len(),
                "Worker同时有多个active任务"
            );
        }

        let mut last_err = None;
        for mut task in tasks {
            if let Some(e) = self.requeue_task(&mut task, reason).await {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn requeue_failed_tasks_of_worker_of_job(
        &self,
        worker: &Worker,
        job_id: Uuid,
        reason: &str,
    ) -> SchedulerResult<()> {
        let tasks = self
            .task_repo
            .fetch_tasks_of_worker_in_status_of_job(worker.id, job_id, TaskStatus::Failed)
            .await?;

        if tasks.is_empty() {
            return Ok(());
        }

        info!(
            worker = %worker.identifier(),
            job_id = %job_id,
            "重新排队 {} 个该Worker失败过的任务",
            tasks.len()
        );

        let mut last_err = None;
        for mut task in tasks {
            if let Some(e) = self.requeue_task(&mut task, reason).await {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
