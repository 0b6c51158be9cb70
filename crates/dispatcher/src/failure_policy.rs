use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use farm_core::{
    config::OrchestratorConfig,
    models::{Job, JobStatus, Task, TaskStatus, Worker},
    traits::{BlocklistRepository, JobRepository, TaskLogSink, TaskRepository},
    SchedulerError, SchedulerResult,
};

use crate::state_machine::TaskStateMachine;

/// Worker报告任务失败后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 任务可由其他Worker重试
    SoftFailed,
    /// 失败次数达到阈值，任务不再重试
    HardFailed,
    /// 已没有可运行该类任务的Worker，整个作业失败
    JobFailed,
}

/// 任务失败与作业黑名单策略
///
/// 两级计数：
/// - 失败过同一任务的不同Worker数量，决定软失败还是硬失败
/// - 同一Worker在某作业某任务类型上的失败次数，决定是否把它加入黑名单
pub struct FailurePolicy {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    blocklist_repo: Arc<dyn BlocklistRepository>,
    state_machine: Arc<dyn TaskStateMachine>,
    task_log: Arc<dyn TaskLogSink>,
    config: OrchestratorConfig,
}

impl FailurePolicy {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        blocklist_repo: Arc<dyn BlocklistRepository>,
        state_machine: Arc<dyn TaskStateMachine>,
        task_log: Arc<dyn TaskLogSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            blocklist_repo,
            state_machine,
            task_log,
            config,
        }
    }

    /// 处理Worker报告的任务失败
    pub async fn task_failed_by_worker(
        &self,
        task: &mut Task,
        worker: &Worker,
    ) -> SchedulerResult<FailureOutcome> {
        let mut job = match self.job_repo.get_job(task.job_id).await? {
            Some(job) => job,
            None => {
                error!(task_id = %task.id, job_id = %task.job_id, "失败任务没有所属作业");
                return Err(SchedulerError::integrity_error(format!(
                    "任务 {} 所属的作业 {} 不存在",
                    task.id, task.job_id
                )));
            }
        };

        let num_failed = self
            .task_repo
            .add_worker_to_task_failed_list(task.id, worker.id)
            .await?;

        debug!(
            task_id = %task.id,
            worker = %worker.identifier(),
            num_failed,
            "记录任务失败"
        );

        if self.maybe_blocklist_worker(&job, task, worker).await? {
            if self.no_workers_left(&job, task).await? {
                self.fail_job_after_catastrophe(&mut job, task, worker)
                    .await?;
                return Ok(FailureOutcome::JobFailed);
            }

            let reason = format!(
                "worker {} was blocked from tasks of type \"{}\"",
                worker.name, task.task_type
            );
            if let Err(e) = self
                .state_machine
                .requeue_failed_tasks_of_worker_of_job(worker, job.id, &reason)
                .await
            {
                warn!(
                    worker = %worker.identifier(),
                    job_id = %job.id,
                    "重新排队被禁Worker失败过的任务出错: {}",
                    e
                );
            }
        }

        let threshold = i64::from(self.config.task_fail_after_softfail_count);
        if num_failed >= threshold {
            self.hard_fail_task(task, num_failed).await?;
            Ok(FailureOutcome::HardFailed)
        } else {
            self.soft_fail_task(task, num_failed, threshold).await?;
            Ok(FailureOutcome::SoftFailed)
        }
    }

    /// 该Worker在此作业此类型任务上失败次数达到阈值时加入黑名单
    async fn maybe_blocklist_worker(
        &self,
        job: &Job,
        task: &Task,
        worker: &Worker,
    ) -> SchedulerResult<bool> {
        let num_failures = self
            .blocklist_repo
            .count_task_failures_of_worker(job.id, worker.id, &task.task_type)
            .await?;

        let threshold = i64::from(self.config.blocklist_threshold);
        if num_failures < threshold {
            debug!(
                worker = %worker.identifier(),
                job_id = %job.id,
                task_type = %task.task_type,
                num_failures,
                threshold,
                "Worker失败次数未达到黑名单阈值"
            );
            return Ok(false);
        }

        info!(
            worker = %worker.identifier(),
            job_id = %job.id,
            task_type = %task.task_type,
            num_failures,
            "Worker失败次数过多，禁止其运行该作业的此类任务"
        );
        self.blocklist_repo
            .add_worker_to_job_blocklist(job.id, worker.id, &task.task_type)
            .await?;
        Ok(true)
    }

    /// 黑名单之外、且未失败过此任务的Worker是否已不存在
    async fn no_workers_left(&self, job: &Job, task: &Task) -> SchedulerResult<bool> {
        let mut workers_left = self
            .blocklist_repo
            .workers_left_to_run(job.id, &task.task_type)
            .await?;

        let failed_before: HashSet<Uuid> = self
            .task_repo
            .fetch_task_failure_list(task.id)
            .await?
            .into_iter()
            .map(|w| w.id)
            .collect();
        workers_left.retain(|id| !failed_before.contains(id));

        debug!(
            job_id = %job.id,
            task_type = %task.task_type,
            num_workers_left = workers_left.len(),
            "剩余可运行该类任务的Worker"
        );
        Ok(workers_left.is_empty())
    }

    async fn fail_job_after_catastrophe(
        &self,
        job: &mut Job,
        task: &mut Task,
        worker: &Worker,
    ) -> SchedulerResult<()> {
        let log_text = format!(
            "Task failed by worker {}, Manager will fail the entire job as there are no more workers left for tasks of type \"{}\".",
            worker.identifier(),
            task.task_type
        );
        warn!(
            job_id = %job.id,
            task_id = %task.id,
            task_type = %task.task_type,
            "没有剩余可运行该类任务的Worker，作业失败"
        );

        let reason = format!(
            "no more workers left to run tasks of type \"{}\"",
            task.task_type
        );
        self.state_machine
            .job_status_change(job, JobStatus::Failed, &reason)
            .await?;

        self.state_machine
            .task_status_change(task, TaskStatus::Failed)
            .await?;
        self.write_task_log(task, &log_text).await;
        Ok(())
    }

    async fn hard_fail_task(&self, task: &mut Task, num_failed: i64) -> SchedulerResult<()> {
        let log_text = format!(
            "Task failed by {}, Manager will mark it as hard failure",
            pluralize(num_failed, "worker")
        );
        info!(task_id = %task.id, num_failed, "任务硬失败");

        self.state_machine
            .task_status_change(task, TaskStatus::Failed)
            .await?;
        self.write_task_log(task, &log_text).await;
        Ok(())
    }

    async fn soft_fail_task(
        &self,
        task: &mut Task,
        num_failed: i64,
        threshold: i64,
    ) -> SchedulerResult<()> {
        let log_text = format!(
            "Task failed by {}, Manager will mark it as soft failure. {} more {} will cause hard failure.",
            pluralize(num_failed, "worker"),
            threshold - num_failed,
            plural_word(threshold - num_failed, "failure")
        );
        info!(task_id = %task.id, num_failed, threshold, "任务软失败");

        self.state_machine
            .task_status_change(task, TaskStatus::SoftFailed)
            .await?;
        self.write_task_log(task, &log_text).await;
        Ok(())
    }

    async fn write_task_log(&self, task: &Task, text: &str) {
        if let Err(e) = self
            .task_log
            .write_timestamped(task.job_id, task.id, text)
            .await
        {
            warn!(task_id = %task.id, "写入任务日志失败: {}", e);
        }
    }
}

fn pluralize(count: i64, noun: &str) -> String {
    format!("{count} {}", plural_word(count, noun))
}

fn plural_word(count: i64, noun: &str) -> String {
    if count == 1 {
        noun.to_string()
    } else {
        format!("{noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "worker"), "1 worker");
        assert_eq!(pluralize(3, "worker"), "3 workers");
        assert_eq!(plural_word(2, "failure"), "failures");
        assert_eq!(plural_word(1, "failure"), "failure");
    }
}
