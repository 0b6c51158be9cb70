use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `json` 或 `pretty`
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.level));
        }

        if self.format != "json" && self.format != "pretty" {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.format));
        }

        Ok(())
    }
}

/// Task log storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLogsConfig {
    pub root_dir: String,
}

impl Default for TaskLogsConfig {
    fn default() -> Self {
        Self {
            root_dir: "task-logs".to_string(),
        }
    }
}

impl TaskLogsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("任务日志目录不能为空"));
        }
        Ok(())
    }
}
