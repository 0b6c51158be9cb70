pub mod app_config;
pub mod database;
pub mod observability;
pub mod orchestrator;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use observability::{LogConfig, TaskLogsConfig};
pub use orchestrator::OrchestratorConfig;
