use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    observability::{LogConfig, TaskLogsConfig},
    orchestrator::OrchestratorConfig,
};

/// Manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LogConfig,
    pub task_logs: TaskLogsConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: FARM_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/farm-manager.toml", "farm-manager.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FARM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.orchestrator
            .validate()
            .context("编排配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        self.task_logs.validate().context("任务日志配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [orchestrator]
            blocklist_threshold = 5
            task_fail_job_percentage = 25
            task_timeout_seconds = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.blocklist_threshold, 5);
        assert_eq!(config.orchestrator.task_fail_job_percentage, 25);
        assert_eq!(config.orchestrator.task_timeout_seconds, 0);
        assert_eq!(config.orchestrator.task_fail_after_softfail_count, 3);
        assert_eq!(config.database.url, "sqlite://farm-manager.sqlite?mode=rwc");
        assert_eq!(config.task_logs.root_dir, "task-logs");
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let result = AppConfig::from_toml(
            r#"
            [database]
            url = "postgresql://localhost/farm"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.orchestrator, config.orchestrator);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[task_logs]
root_dir = "/var/lib/farm/task-logs"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.task_logs.root_dir, "/var/lib/farm/task-logs");
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/farm-manager.toml")).is_err());
    }
}
