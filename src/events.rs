//! Mutation events
//!
//! The engine announces every leaf write and delete as a [`MutationEvent`] on a
//! broadcast channel. Listeners subscribe from outside; the engine never waits
//! for them and a send with nobody listening is silently dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::OperationId;
use crate::query::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationEvent {
    pub operation_id: OperationId,
    pub connection: String,
    pub model: String,
    pub kind: MutationKind,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MutationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.sender.subscribe()
    }

    /// Send to every current subscriber; returns how many received it.
    pub fn publish(&self, event: MutationEvent) -> usize {
        if event.records.is_empty() {
            return 0;
        }
        log::debug!(
            "[{}] {:?} {} row(s) of {}",
            event.operation_id,
            event.kind,
            event.records.len(),
            event.model
        );
        self.sender.send(event).unwrap_or(0)
    }
}
