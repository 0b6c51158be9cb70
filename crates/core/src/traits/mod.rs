pub mod broadcaster;
pub mod clock;
pub mod repository;
pub mod task_log;

pub use broadcaster::*;
pub use clock::*;
pub use repository::*;
pub use task_log::*;
