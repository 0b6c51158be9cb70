use thiserror::Error;
use uuid::Uuid;

/// 编排核心错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("作业未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: Uuid },

    /// 数据不一致，例如任务找不到所属作业。属于程序错误，不应重试。
    #[error("数据完整性错误: {0}")]
    DataIntegrity(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn integrity_error<S: Into<String>>(msg: S) -> Self {
        Self::DataIntegrity(msg.into())
    }

    /// 是否为"记录不存在"类错误，API层据此返回404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound { .. }
                | SchedulerError::TaskNotFound { .. }
                | SchedulerError::WorkerNotFound { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::DataIntegrity(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for SchedulerError {
    fn from(err: uuid::Error) -> Self {
        SchedulerError::Serialization(format!("无效的UUID: {err}"))
    }
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        SchedulerError::Configuration(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let id = Uuid::new_v4();
        assert!(SchedulerError::JobNotFound { id }.is_not_found());
        assert!(SchedulerError::TaskNotFound { id }.is_not_found());
        assert!(SchedulerError::WorkerNotFound { id }.is_not_found());
        assert!(!SchedulerError::database_error("boom").is_not_found());
    }

    #[test]
    fn test_integrity_error_is_fatal() {
        let err = SchedulerError::integrity_error("task without job");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("task without job"));
        assert!(!SchedulerError::database_error("busy").is_fatal());
    }
}
