#![allow(dead_code)]

use std::sync::Arc;

use farm_core::config::OrchestratorConfig;
use farm_dispatcher::{FailurePolicy, StateMachine, TaskScheduler, TaskStateMachine, TimeoutChecker};
use farm_testing_utils::TestFixture;

pub fn state_machine(fixture: &TestFixture, config: &OrchestratorConfig) -> Arc<StateMachine> {
    Arc::new(StateMachine::new(
        fixture.store.clone(),
        fixture.store.clone(),
        fixture.broadcaster.clone(),
        fixture.task_log.clone(),
        config.clone(),
    ))
}

pub fn task_scheduler(fixture: &TestFixture, config: &OrchestratorConfig) -> TaskScheduler {
    let state_machine: Arc<dyn TaskStateMachine> = state_machine(fixture, config);
    TaskScheduler::new(
        fixture.store.clone(),
        fixture.store.clone(),
        state_machine,
        fixture.clock.clone(),
    )
}

pub fn failure_policy(fixture: &TestFixture, config: &OrchestratorConfig) -> FailurePolicy {
    let state_machine: Arc<dyn TaskStateMachine> = state_machine(fixture, config);
    FailurePolicy::new(
        fixture.store.clone(),
        fixture.store.clone(),
        fixture.store.clone(),
        state_machine,
        fixture.task_log.clone(),
        config.clone(),
    )
}

pub fn timeout_checker(fixture: &TestFixture, config: &OrchestratorConfig) -> TimeoutChecker {
    let state_machine: Arc<dyn TaskStateMachine> = state_machine(fixture, config);
    TimeoutChecker::new(
        fixture.store.clone(),
        fixture.store.clone(),
        state_machine,
        fixture.broadcaster.clone(),
        fixture.task_log.clone(),
        fixture.clock.clone(),
        config.clone(),
    )
}
