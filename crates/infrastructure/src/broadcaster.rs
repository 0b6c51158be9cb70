use farm_core::{
    models::{ChangeEvent, JobUpdate, TaskUpdate, WorkerUpdate},
    traits::ChangeBroadcaster,
};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 1024;

/// 基于 `tokio::sync::broadcast` 的变更广播
///
/// 没有订阅者时事件直接丢弃；处理过慢的订阅者会丢失最旧的事件（`RecvError::Lagged`）。
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, event: ChangeEvent) {
        if let Err(e) = self.sender.send(event) {
            trace!("没有订阅者，丢弃变更事件: {:?}", e.0);
        }
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeBroadcaster for ChannelBroadcaster {
    fn broadcast_job_update(&self, update: JobUpdate) {
        self.send(ChangeEvent::Job(update));
    }

    fn broadcast_task_update(&self, update: TaskUpdate) {
        self.send(ChangeEvent::Task(update));
    }

    fn broadcast_worker_update(&self, update: WorkerUpdate) {
        self.send(ChangeEvent::Worker(update));
    }
}
