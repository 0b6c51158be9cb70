//! Test helper utilities and common testing patterns

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use farm_core::models::{Job, Task, Worker};

use crate::mocks::{MockClock, MockStore, RecordingBroadcaster, RecordingTaskLog};

/// The collaborators every orchestration component needs, backed by mocks
#[derive(Clone)]
pub struct TestFixture {
    pub store: Arc<MockStore>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub task_log: Arc<RecordingTaskLog>,
    pub clock: Arc<MockClock>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Fixture whose clock starts at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            store: Arc::new(MockStore::new()),
            broadcaster: Arc::new(RecordingBroadcaster::new()),
            task_log: Arc::new(RecordingTaskLog::new()),
            clock: Arc::new(MockClock::new(now)),
        }
    }

    pub fn with_job(self, job: &Job, tasks: &[Task]) -> Self {
        self.store.insert_job(job.clone());
        for task in tasks {
            self.store.insert_task(task.clone());
        }
        self
    }

    pub fn with_worker(self, worker: &Worker) -> Self {
        self.store.insert_worker(worker.clone());
        self
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// UTC timestamp from literal components.
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .unwrap_or_else(|| panic!("invalid timestamp {year}-{month}-{day} {hour}:{minute}:{second}"))
}
