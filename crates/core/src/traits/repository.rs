//! 持久化网关接口定义
//!
//! 编排核心只通过这些接口访问存储：
//! - `JobRepository` - 作业状态及其批量任务更新
//! - `TaskRepository` - 任务保存、原子调度、失败记录
//! - `WorkerRepository` - Worker状态与心跳
//! - `BlocklistRepository` - 作业黑名单
//! - `SleepScheduleRepository` - Worker睡眠计划
//!
//! 所有方法都是异步的，实现必须是 `Send + Sync`，
//! 以 `Arc<dyn Trait>` 的形式注入各组件。

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Job, JobBlock, JobStatus, SleepSchedule, Task, TaskMassUpdate, TaskStatus, Worker,
};
use crate::SchedulerResult;

/// 作业仓储接口
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 保存作业及其全部任务（作业编译器调用）
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> SchedulerResult<()>;

    async fn get_job(&self, id: Uuid) -> SchedulerResult<Option<Job>>;

    /// 只保存状态与活动描述
    async fn save_job_status(&self, job: &Job) -> SchedulerResult<()>;

    async fn fetch_jobs_in_status(&self, statuses: &[JobStatus]) -> SchedulerResult<Vec<Job>>;

    async fn job_has_tasks_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<bool>;

    /// 返回 (处于给定状态的任务数, 任务总数)
    async fn count_tasks_of_job_in_status(
        &self,
        job_id: Uuid,
        statuses: &[TaskStatus],
    ) -> SchedulerResult<(i64, i64)>;

    /// 把作业的全部任务设为 `new_status`
    async fn update_job_tasks_statuses(
        &self,
        job_id: Uuid,
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()>;

    /// 只更新当前状态属于 `statuses_to_update` 的任务
    async fn update_job_tasks_statuses_conditional(
        &self,
        job_id: Uuid,
        statuses_to_update: &[TaskStatus],
        new_status: TaskStatus,
        activity: &str,
    ) -> SchedulerResult<()>;

    /// 清空作业下所有任务的失败记录
    async fn clear_job_failure_list(&self, job_id: Uuid) -> SchedulerResult<()>;

    /// 保存作业状态并执行随之而来的批量任务更新
    ///
    /// 默认实现按顺序调用上面的方法；支持事务的存储应覆盖此方法，
    /// 保证两者要么都生效要么都不生效。
    async fn save_job_status_and_update_tasks(
        &self,
        job: &Job,
        update: Option<&TaskMassUpdate>,
    ) -> SchedulerResult<()> {
        self.save_job_status(job).await?;

        let Some(update) = update else {
            return Ok(());
        };

        match &update.only_statuses {
            None => {
                self.update_job_tasks_statuses(job.id, update.new_status, &update.activity)
                    .await?
            }
            Some(statuses) => {
                self.update_job_tasks_statuses_conditional(
                    job.id,
                    statuses,
                    update.new_status,
                    &update.activity,
                )
                .await?
            }
        }

        if update.clear_failures {
            self.clear_job_failure_list(job.id).await?;
        }
        Ok(())
    }
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<Task>>;

    async fn fetch_tasks_of_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>>;

    /// 保存任务的状态、活动描述、分配Worker与触达时间
    async fn save_task(&self, task: &Task) -> SchedulerResult<()>;

    /// 只保存活动描述
    async fn save_task_activity(&self, task: &Task) -> SchedulerResult<()>;

    async fn fetch_tasks_of_worker_in_status(
        &self,
        worker_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>>;

    async fn fetch_tasks_of_worker_in_status_of_job(
        &self,
        worker_id: Uuid,
        job_id: Uuid,
        status: TaskStatus,
    ) -> SchedulerResult<Vec<Task>>;

    /// 记录Worker仍在处理该任务
    async fn task_touched_by_worker(&self, task_id: Uuid, at: DateTime<Utc>)
        -> SchedulerResult<()>;

    /// `active` 且 `last_touched_at` 不晚于 `untouched_since` 的任务
    async fn fetch_timed_out_tasks(
        &self,
        untouched_since: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>>;

    /// 为Worker原子地挑选并分配一个任务
    ///
    /// 查找与分配在同一事务内完成，并发调用不会拿到同一个任务。
    /// 没有可运行任务时返回 `Ok(None)`。
    async fn schedule_task(&self, worker: &Worker) -> SchedulerResult<Option<Task>>;

    /// 记录失败并返回失败过该任务的不同Worker数量
    async fn add_worker_to_task_failed_list(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
    ) -> SchedulerResult<i64>;

    async fn fetch_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<Vec<Worker>>;

    async fn clear_task_failure_list(&self, task_id: Uuid) -> SchedulerResult<()>;
}

/// Worker仓储接口
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create_worker(&self, worker: &Worker) -> SchedulerResult<()>;

    async fn get_worker(&self, id: Uuid) -> SchedulerResult<Option<Worker>>;

    async fn fetch_workers(&self) -> SchedulerResult<Vec<Worker>>;

    async fn save_worker(&self, worker: &Worker) -> SchedulerResult<()>;

    /// 只保存状态与状态切换请求
    async fn save_worker_status(&self, worker: &Worker) -> SchedulerResult<()>;

    async fn worker_seen(&self, worker_id: Uuid, at: DateTime<Utc>) -> SchedulerResult<()>;

    /// 非 `offline`、非 `error` 且 `last_seen_at` 早于 `last_seen_before` 的Worker
    ///
    /// 已处于 `error` 的Worker在上一次超时处理时已被处理过
    async fn fetch_timed_out_workers(
        &self,
        last_seen_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Worker>>;
}

/// 作业黑名单仓储接口
#[async_trait]
pub trait BlocklistRepository: Send + Sync {
    /// 幂等：重复添加同一条目不报错
    async fn add_worker_to_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()>;

    async fn fetch_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<Vec<JobBlock>>;

    async fn remove_from_job_blocklist(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<()>;

    async fn clear_job_blocklist(&self, job_id: Uuid) -> SchedulerResult<()>;

    /// 未被禁止运行该作业中此类任务的Worker集合
    async fn workers_left_to_run(
        &self,
        job_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<HashSet<Uuid>>;

    /// 该Worker在此作业此任务类型上的失败次数
    async fn count_task_failures_of_worker(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        task_type: &str,
    ) -> SchedulerResult<i64>;
}

/// 睡眠计划仓储接口
#[async_trait]
pub trait SleepScheduleRepository: Send + Sync {
    async fn fetch_worker_sleep_schedule(
        &self,
        worker_id: Uuid,
    ) -> SchedulerResult<Option<SleepSchedule>>;

    /// 创建或替换Worker的睡眠计划
    async fn set_worker_sleep_schedule(&self, schedule: &SleepSchedule) -> SchedulerResult<()>;

    async fn set_worker_sleep_schedule_next_check(
        &self,
        schedule: &SleepSchedule,
    ) -> SchedulerResult<()>;

    /// 启用且到期（`next_check` 为空或不晚于 `now`）的计划
    async fn fetch_sleep_schedules_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<SleepSchedule>>;
}
