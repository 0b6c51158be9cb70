use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 编排核心的阈值与周期配置
///
/// 构造后不可变，按值或 `Arc` 传入各组件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 同一任务被多少个不同Worker失败后判定为硬失败
    pub task_fail_after_softfail_count: u32,
    /// Worker在同一作业同一任务类型上失败多少次后被加入黑名单
    pub blocklist_threshold: u32,
    /// 作业失败任务占比达到该百分比时整个作业失败
    pub task_fail_job_percentage: u32,
    /// 0 表示不检查任务超时
    pub task_timeout_seconds: u64,
    /// 0 表示不检查Worker超时
    pub worker_timeout_seconds: u64,
    pub timeout_check_interval_seconds: u64,
    pub timeout_initial_sleep_seconds: u64,
    pub sleep_check_interval_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_fail_after_softfail_count: 3,
            blocklist_threshold: 3,
            task_fail_job_percentage: 10,
            task_timeout_seconds: 300,
            worker_timeout_seconds: 60,
            timeout_check_interval_seconds: 60,
            timeout_initial_sleep_seconds: 300,
            sleep_check_interval_seconds: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task_fail_after_softfail_count == 0 {
            return Err(anyhow::anyhow!("软失败阈值必须大于0"));
        }

        if self.blocklist_threshold == 0 {
            return Err(anyhow::anyhow!("黑名单阈值必须大于0"));
        }

        if self.task_fail_job_percentage > 100 {
            return Err(anyhow::anyhow!(
                "作业失败百分比不能超过100: {}",
                self.task_fail_job_percentage
            ));
        }

        if self.timeout_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("超时检查间隔必须大于0"));
        }

        if self.sleep_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("睡眠计划检查间隔必须大于0"));
        }

        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_seconds)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_interval_seconds)
    }

    pub fn timeout_initial_sleep(&self) -> Duration {
        Duration::from_secs(self.timeout_initial_sleep_seconds)
    }

    pub fn sleep_check_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_check_interval_seconds)
    }
}
