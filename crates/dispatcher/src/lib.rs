//! Farm Dispatcher
//!
//! The orchestration core of the render farm manager: every change to a
//! job or task status goes through the state machine, which the scheduler,
//! the failure policy and the two background loops build upon.

pub mod failure_policy;
pub mod sleep_scheduler;
pub mod state_machine;
pub mod task_scheduler;
pub mod timeout_checker;

pub use failure_policy::{FailureOutcome, FailurePolicy};
pub use sleep_scheduler::SleepScheduler;
pub use state_machine::{StateMachine, TaskStateMachine};
pub use task_scheduler::TaskScheduler;
pub use timeout_checker::TimeoutChecker;
