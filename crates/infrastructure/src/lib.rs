//! Storage and delivery adapters for the farm manager: the SQLite persistence
//! gateway, file-backed task logs and the in-process change broadcaster.

pub mod broadcaster;
pub mod database;
pub mod task_logs;

pub use broadcaster::ChannelBroadcaster;
pub use database::DatabaseManager;
pub use task_logs::TaskLogStorage;
