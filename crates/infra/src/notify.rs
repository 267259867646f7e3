//! Best-effort notifications about order and KYC changes.
//!
//! Delivery (push, email) is out of scope; sinks only record or forward.
//! A failing sink never affects the operation that triggered it: callers log
//! and move on.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agrinet_core::{OrderId, UserId};
use agrinet_events::EventBus;

/// Default per-user inbox size.
pub const DEFAULT_INBOX_CAPACITY: usize = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "user_id")]
pub enum Recipient {
    User(UserId),
    /// Everyone watching the marketplace, in practice admins.
    Broadcast,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderStatusChanged,
    DisputeOpened,
    KycApproved,
    ProductListed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub order_id: Option<OrderId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    pub fn new(recipient: Recipient, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            recipient,
            kind,
            order_id: None,
            message: message.into(),
            created_at: Utc::now(),
            read: false,
        }
    }

    pub fn for_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        (**self).notify(notification)
    }
}

/// Deliver each notification, logging (not returning) individual failures.
pub fn notify_all(sink: &dyn NotificationSink, notifications: Vec<Notification>) {
    for n in notifications {
        let recipient = n.recipient;
        let kind = n.kind;
        if let Err(err) = sink.notify(n) {
            tracing::warn!(?recipient, ?kind, error = %err, "notification dropped");
        }
    }
}

#[derive(Debug, Default)]
struct Inboxes {
    users: HashMap<UserId, VecDeque<Notification>>,
    broadcast: VecDeque<Notification>,
}

/// Per-user inbox kept in memory, newest first, truncated to `capacity`.
#[derive(Debug)]
pub struct InMemoryInbox {
    capacity: usize,
    inboxes: Mutex<Inboxes>,
}

impl Default for InMemoryInbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }
}

impl InMemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inboxes: Mutex::new(Inboxes::default()),
        }
    }

    /// Notifications for `user_id`, newest first.
    pub fn inbox(&self, user_id: UserId) -> Vec<Notification> {
        self.inboxes
            .lock()
            .map(|i| i.users.get(&user_id).map(|q| q.iter().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn broadcasts(&self) -> Vec<Notification> {
        self.inboxes
            .lock()
            .map(|i| i.broadcast.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, user_id: UserId) -> usize {
        self.inbox(user_id).iter().filter(|n| !n.read).count()
    }

    pub fn mark_all_read(&self, user_id: UserId) {
        if let Ok(mut inboxes) = self.inboxes.lock() {
            if let Some(queue) = inboxes.users.get_mut(&user_id) {
                queue.iter_mut().for_each(|n| n.read = true);
            }
        }
    }
}

impl NotificationSink for InMemoryInbox {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut inboxes = self
            .inboxes
            .lock()
            .map_err(|_| NotifyError::Unavailable("inbox lock poisoned".to_string()))?;

        let queue = match notification.recipient {
            Recipient::User(user_id) => inboxes.users.entry(user_id).or_default(),
            Recipient::Broadcast => &mut inboxes.broadcast,
        };
        queue.push_front(notification);
        queue.truncate(self.capacity);
        Ok(())
    }
}

/// Forwards notifications onto an event bus.
pub struct BusNotificationSink<B> {
    bus: B,
}

impl<B> BusNotificationSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> NotificationSink for BusNotificationSink<B>
where
    B: EventBus<Notification>,
{
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.bus
            .publish(notification)
            .map_err(|e| NotifyError::Unavailable(format!("{e:?}")))
    }
}

/// Logs each notification; the default sink when nothing else is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = ?notification.recipient,
            kind = ?notification.kind,
            order_id = ?notification.order_id,
            message = %notification.message,
            "notification"
        );
        Ok(())
    }
}
