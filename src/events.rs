//! Lifecycle events emitted by the batch orchestrator.
//!
//! Delivery is at-least-once: a publisher that retries may hand the same envelope to a
//! consumer twice, so consumers deduplicate on [`EventEnvelope::id`]. Synchronous
//! listeners run inline on the publishing task before asynchronous subscribers are fed.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::{Fingerprint, RevocationReason, SerialNumber};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    BatchCompleted {
        file_id: Uuid,
        batch_index: usize,
        success: usize,
        skipped: usize,
        failed: usize,
    },
    ValidationCompleted {
        file_id: Uuid,
        certificates_valid: usize,
        certificates_invalid: usize,
        crls_valid: usize,
        crls_invalid: usize,
    },
    RevocationDetected {
        certificate: Fingerprint,
        serial_number: SerialNumber,
        reason: Option<RevocationReason>,
        revoked_at: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    },
}

/// When an event is delivered relative to the directory commit of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryPhase {
    /// Before the batch is written; the batch may still fail afterwards
    BeforeCommit,
    /// After the batch is durably written
    AfterCommit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub phase: DeliveryPhase,
    pub emitted_at: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Receives events synchronously on the publishing task. Implementations must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, envelope: &EventEnvelope);
}

impl<F> EventListener for F
where
    F: Fn(&EventEnvelope) + Send + Sync,
{
    fn on_event(&self, envelope: &EventEnvelope) {
        self(envelope)
    }
}

/// In-process event channel.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    subscribers: RwLock<Vec<UnboundedSender<EventEnvelope>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous listener.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Opens an asynchronous subscription receiving every subsequent envelope.
    pub fn subscribe(&self) -> UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Publishes `event` in `phase` and returns the envelope id.
    pub fn publish(&self, event: PipelineEvent, phase: DeliveryPhase) -> Uuid {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            phase,
            emitted_at: Utc::now(),
            event,
        };
        self.deliver(&envelope);
        envelope.id
    }

    /// Delivers an existing envelope again, keeping its id.
    pub fn redeliver(&self, envelope: &EventEnvelope) {
        self.deliver(envelope);
    }

    fn deliver(&self, envelope: &EventEnvelope) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in &listeners {
            listener.on_event(envelope);
        }

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        trace!(
            "Delivered event {} to {} listener(s) and {} subscriber(s)",
            envelope.id,
            listeners.len(),
            subscribers.len()
        );
        debug!("Published {:?} event {}", envelope.phase, envelope.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn batch_event() -> PipelineEvent {
        PipelineEvent::BatchCompleted {
            file_id: Uuid::new_v4(),
            batch_index: 0,
            success: 3,
            skipped: 1,
            failed: 0,
        }
    }

    #[test]
    fn test_listener_runs_before_publish_returns() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.add_listener(Arc::new(move |envelope: &EventEnvelope| {
            sink.lock().unwrap().push(envelope.id);
        }));

        let id = bus.publish(batch_event(), DeliveryPhase::BeforeCommit);
        assert_eq!(*seen.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_subscriber_receives_envelope() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let id = bus.publish(batch_event(), DeliveryPhase::AfterCommit);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.id, id);
        assert_eq!(envelope.phase, DeliveryPhase::AfterCommit);
    }

    #[tokio::test]
    async fn test_redelivery_keeps_id() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(batch_event(), DeliveryPhase::AfterCommit);
        let first = rx.recv().await.unwrap();
        bus.redeliver(&first);
        let second = rx.recv().await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        bus.publish(batch_event(), DeliveryPhase::AfterCommit);
        assert!(bus.subscribers.read().unwrap().is_empty());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(batch_event()).unwrap();
        assert_eq!(json["type"], "batch_completed");
        assert_eq!(json["success"], 3);
    }
}
