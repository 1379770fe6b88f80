//! In-process event delivery.
//!
//! Writers stage events on an [`Outbox`] while they mutate state and only
//! hand them to the [`EventSink`] once the mutation has succeeded. Dropping
//! an outbox without committing discards whatever it holds.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::event::DomainEvent;

pub trait EventSink: Send + Sync {
    /// Never blocks and never fails the caller.
    fn publish(&self, event: DomainEvent);
}

/// Sharded queue feeding the fan-out workers. Events with the same shard
/// key always land on the same worker, so they are handled in the order
/// they were published. Shards are unbounded: by the time an event is
/// published its write has committed, and its notification must not be lost.
pub struct EventBus {
    shards: Vec<mpsc::UnboundedSender<DomainEvent>>,
}

impl EventBus {
    pub fn new(shards: usize) -> (Self, Vec<mpsc::UnboundedReceiver<DomainEvent>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..shards.max(1))
            .map(|_| mpsc::unbounded_channel())
            .unzip();
        (Self { shards: senders }, receivers)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, key: Uuid) -> usize {
        (key.as_u128() % self.shards.len() as u128) as usize
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: DomainEvent) {
        let shard = self.shard_for(event.shard_key());
        let name = event.name();
        match self.shards[shard].send(event) {
            Ok(()) => debug!(event = name, shard, "event queued"),
            Err(_) => warn!(event = name, shard, "event worker stopped, dropping event"),
        }
    }
}

pub struct Outbox<'a> {
    sink: &'a dyn EventSink,
    staged: Vec<DomainEvent>,
}

impl<'a> Outbox<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            staged: Vec::new(),
        }
    }

    pub fn stage(&mut self, event: DomainEvent) {
        self.staged.push(event);
    }

    pub fn commit(mut self) {
        for event in std::mem::take(&mut self.staged) {
            self.sink.publish(event);
        }
    }
}

impl Drop for Outbox<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(count = self.staged.len(), "discarding uncommitted events");
        }
    }
}

/// Records published events instead of delivering them.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for CapturingSink {
    fn publish(&self, event: DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
