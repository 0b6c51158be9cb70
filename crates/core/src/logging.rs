use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::errors::{SchedulerError, SchedulerResult};

/// 初始化全局日志
///
/// `RUST_LOG` 环境变量优先于配置中的日志级别。
pub fn init_logging(config: &LogConfig) -> SchedulerResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| SchedulerError::config_error(format!("初始化JSON日志格式失败: {e}")))?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| SchedulerError::config_error(format!("初始化Pretty日志格式失败: {e}")))?,
        other => {
            return Err(SchedulerError::config_error(format!(
                "不支持的日志格式: {other}"
            )))
        }
    }

    Ok(())
}
