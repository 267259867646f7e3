//! Post-commit side effects: domain event envelopes and notifications.
//!
//! An operation fills an [`Outbox`] while deciding, commits its unit of work,
//! then flushes. Nothing is published for a unit that failed to commit.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use agrinet_events::{Event, EventBus, EventEnvelope};

use crate::notify::{Notification, NotificationSink, notify_all};

pub type JsonEnvelope = EventEnvelope<JsonValue>;

/// Object-safe view of an `EventBus` carrying JSON envelopes.
pub trait EnvelopePublisher: Send + Sync {
    fn publish_envelope(&self, envelope: JsonEnvelope) -> Result<(), String>;
}

impl<B> EnvelopePublisher for B
where
    B: EventBus<JsonEnvelope>,
{
    fn publish_envelope(&self, envelope: JsonEnvelope) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

/// Where an outbox is flushed to.
#[derive(Clone)]
pub struct Effects {
    pub notifier: Arc<dyn NotificationSink>,
    pub publisher: Option<Arc<dyn EnvelopePublisher>>,
}

impl Effects {
    pub fn new(notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            notifier,
            publisher: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<JsonEnvelope>,
    notifications: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `events` that brought an aggregate to `version_after`.
    pub fn record<E>(&mut self, aggregate_id: Uuid, aggregate_type: &str, version_after: u64, events: &[E])
    where
        E: Event + Serialize,
    {
        let first = version_after.saturating_sub(events.len() as u64) + 1;
        for (offset, event) in events.iter().enumerate() {
            match JsonEnvelope::from_typed(aggregate_id, aggregate_type, first + offset as u64, event) {
                Ok(envelope) => self.envelopes.push(envelope),
                Err(err) => tracing::warn!(
                    event_type = event.event_type(),
                    error = %err,
                    "failed to serialize event payload"
                ),
            }
        }
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn envelopes(&self) -> &[JsonEnvelope] {
        &self.envelopes
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Publish and notify. Failures are logged, never returned.
    pub fn flush(self, effects: &Effects) {
        if let Some(publisher) = &effects.publisher {
            for envelope in self.envelopes {
                let event_type = envelope.event_type().to_string();
                if let Err(err) = publisher.publish_envelope(envelope) {
                    tracing::warn!(%event_type, %err, "event publication failed");
                }
            }
        }
        notify_all(effects.notifier.as_ref(), self.notifications);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrinet_core::{Aggregate, Money, ProductId, UserId};
    use agrinet_catalog::{CreateProduct, Product, ProductCommand};
    use agrinet_events::InMemoryEventBus;
    use chrono::Utc;

    use crate::notify::{InMemoryInbox, NotificationKind, Recipient};

    #[test]
    fn sequence_numbers_follow_the_aggregate_version() {
        let id = ProductId::new();
        let mut product = Product::empty(id);
        let events = product
            .execute(&ProductCommand::CreateProduct(CreateProduct {
                product_id: id,
                owner_id: UserId::new(),
                owner_kyc_verified: true,
                name: "Sorghum".to_string(),
                description: String::new(),
                price: Money::from_minor(3),
                quantity: 1,
                occurred_at: Utc::now(),
            }))
            .unwrap();

        let mut outbox = Outbox::new();
        outbox.record(*id.as_uuid(), "catalog.product", 1, &events);

        assert_eq!(outbox.envelopes().len(), 1);
        assert_eq!(outbox.envelopes()[0].sequence_number(), 1);
        assert_eq!(outbox.envelopes()[0].event_type(), "catalog.product.listed");
    }

    #[test]
    fn flush_publishes_and_notifies() {
        let bus: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let inbox = Arc::new(InMemoryInbox::new());
        let effects = Effects {
            notifier: inbox.clone(),
            publisher: Some(bus.clone()),
        };

        let user = UserId::new();
        let mut outbox = Outbox::new();
        outbox.envelopes.push(JsonEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "test",
            "test.happened",
            1,
            Utc::now(),
            JsonValue::Null,
        ));
        outbox.notify(Notification::new(Recipient::User(user), NotificationKind::KycApproved, "ok"));
        outbox.flush(&effects);

        assert_eq!(sub.drain().len(), 1);
        assert_eq!(inbox.inbox(user).len(), 1);
    }
}
