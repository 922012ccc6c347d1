//! In-process stand-in for the external topic bus (§1 out of scope, §5
//! "Message bus"). The real fabric is at-least-once with best-effort
//! per-publisher ordering; `tokio::sync::broadcast` gives the same shape
//! for in-process fan-out, which is all this crate needs to exercise the
//! six components end-to-end. Handlers key idempotency off `(topic,
//! event_id)`, mirroring the contract the real bus is expected to honor.

use crate::events::CoreEvent;
use crate::models::EventId;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::warn;

pub const TOPIC_CAPACITY: usize = 4096;

/// Envelope every event crosses the bus wrapped in; carries the id used for
/// the idempotency key the real bus' delivery guarantee requires handlers
/// to honor.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event_id: EventId,
    pub event: CoreEvent,
}

impl Envelope {
    pub fn new(event: CoreEvent) -> Self {
        Self { event_id: EventId::new(), event }
    }
}

/// The topic bus. One broadcast channel for the whole crate keeps ordering
/// simple for this reference implementation; production deployments route
/// by topic name over the external fabric instead.
#[derive(Clone)]
pub struct TopicBus {
    sender: broadcast::Sender<Envelope>,
}

impl TopicBus {
    pub fn new() -> Self {
        let (sender, _rx) = broadcast::channel(TOPIC_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: CoreEvent) {
        let envelope = Envelope::new(event);
        metrics::counter!("bus.events_published").increment(1);
        metrics::gauge!("bus.subscriber_count").set(self.sender.receiver_count() as f64);
        // A lagging/absent receiver is not an error here: at-least-once
        // delivery is best-effort per §5, and this is an in-process bus.
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks seen `(topic, event_id)` pairs so a handler can be idempotent
/// under at-least-once delivery, per §5.
#[derive(Default)]
pub struct DedupeWindow {
    seen: HashSet<EventId>,
}

impl DedupeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time an event id is observed; false on every
    /// redelivery, so the caller can skip reprocessing.
    pub fn observe(&mut self, id: EventId) -> bool {
        self.seen.insert(id)
    }
}

pub fn log_bus_error(context: &str, err: impl std::fmt::Display) {
    warn!(context, %err, "bus handler error, continuing");
}
