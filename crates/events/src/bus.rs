//! Content event envelope and the in-process bus that carries it.
//!
//! Content services build a [`NotificationEvent`] after their own
//! transaction commits and hand it to [`EventBus::publish`], which never
//! blocks. The [`NotificationEngine`](crate::NotificationEngine) consumes
//! the bus on its own task.

use chrono::Utc;
use quill_core::event_types::{EventType, Priority};
use quill_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use validator::Validate;

// ---------------------------------------------------------------------------
// NotificationEvent
// ---------------------------------------------------------------------------

/// A fact emitted by a content service that may trigger notifications.
///
/// `source_type` names the subscription kind the source belongs to
/// (`"work"`, `"series"`, ...). Comment and kudos events use the work they
/// were left on as their source. Filterable content attributes and
/// related-target ids travel in `extra_data`; see
/// [`quill_core::attributes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NotificationEvent {
    pub event_type: EventType,

    #[validate(range(min = 1))]
    pub source_id: DbId,

    #[validate(length(min = 1))]
    pub source_type: String,

    #[validate(length(min = 1, max = 500))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub action_url: String,

    #[serde(default)]
    pub actor_id: Option<DbId>,

    #[serde(default)]
    pub actor_name: String,

    #[serde(default)]
    pub extra_data: serde_json::Value,

    /// Overrides the event type's default priority.
    #[serde(default)]
    pub priority: Option<Priority>,

    pub occurred_at: Timestamp,
}

impl NotificationEvent {
    pub fn new(
        event_type: EventType,
        source_type: impl Into<String>,
        source_id: DbId,
        title: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            source_id,
            source_type: source_type.into(),
            title: title.into(),
            description: String::new(),
            action_url: String::new(),
            actor_id: None,
            actor_name: String::new(),
            extra_data: serde_json::Value::Object(Default::default()),
            priority: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: DbId, actor_name: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_name = actor_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = url.into();
        self
    }

    /// Set the extra data carrying content attributes and related ids.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra_data = extra;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
            .unwrap_or_else(|| self.event_type.default_priority())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use quill_core::event_types::EventType;
/// use quill_events::bus::{EventBus, NotificationEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(NotificationEvent::new(EventType::WorkUpdated, "work", 42, "Chapter 3"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers without waiting.
    pub fn publish(&self, event: NotificationEvent) {
        // A SendError only means there are zero receivers.
        if self.sender.send(event).is_err() {
            tracing::debug!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            NotificationEvent::new(EventType::CommentReceived, "work", 42, "New comment")
                .with_actor(7, "reader")
                .with_extra(serde_json::json!({"rating": "Mature"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, EventType::CommentReceived);
        assert_eq!(received.source_id, 42);
        assert_eq!(received.actor_id, Some(7));
        assert_eq!(received.extra_data["rating"], "Mature");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(NotificationEvent::new(EventType::NewWork, "work", 1, "Orphan"));
    }

    #[test]
    fn priority_defaults_to_event_type() {
        let event = NotificationEvent::new(EventType::KudosReceived, "work", 1, "Kudos");
        assert_eq!(event.priority(), Priority::Low);
        assert_eq!(event.with_priority(Priority::High).priority(), Priority::High);
    }

    #[test]
    fn validation_rejects_missing_source() {
        let event = NotificationEvent::new(EventType::WorkUpdated, "", 0, "Chapter 2");
        let errors = event.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("source_id"));
        assert!(fields.contains_key("source_type"));
    }
}
