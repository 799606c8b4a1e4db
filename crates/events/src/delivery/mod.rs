//! Outbound delivery.
//!
//! The engine and the scheduler only see [`DeliveryDispatcher`]. The
//! concrete channels are [`webhook`] (web and push through a gateway) and
//! [`email`] (SMTP); [`ChannelRouter`] picks one per channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::channels::DeliveryChannel;
use quill_core::digest::DigestType;
use quill_core::event_types::{EventType, Priority};
use quill_core::types::{DbId, Timestamp};
use quill_db::models::notification::NotificationItem;
use serde::Serialize;

pub mod email;
pub mod webhook;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One notification as it leaves the system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPayload {
    pub item_id: DbId,
    pub event: EventType,
    pub priority: Priority,
    pub source_type: String,
    pub source_id: DbId,
    pub title: String,
    pub description: String,
    pub action_url: String,
    pub actor_name: String,
    pub created_at: Timestamp,
}

impl From<&NotificationItem> for ItemPayload {
    fn from(item: &NotificationItem) -> Self {
        Self {
            item_id: item.id,
            event: item.event,
            priority: item.priority,
            source_type: item.source_type.clone(),
            source_id: item.source_id,
            title: item.title.clone(),
            description: item.description.clone(),
            action_url: item.action_url.clone(),
            actor_name: item.actor_name.clone(),
            created_at: item.created_at,
        }
    }
}

/// A rendered digest: subject and plain-text body plus the enclosed items
/// in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestPayload {
    pub digest_id: DbId,
    pub digest_type: DigestType,
    pub subject: String,
    pub body: String,
    pub items: Vec<ItemPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Item(ItemPayload),
    Digest(DigestPayload),
}

impl DeliveryPayload {
    /// Stable key for the delivered entity. Receivers use it to drop
    /// repeated sends of the same item or digest.
    pub fn idempotency_key(&self) -> String {
        match self {
            DeliveryPayload::Item(item) => format!("item-{}", item.item_id),
            DeliveryPayload::Digest(digest) => format!("digest-{}", digest.digest_id),
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            DeliveryPayload::Item(item) => &item.title,
            DeliveryPayload::Digest(digest) => &digest.subject,
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The call did not finish within the configured bound.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// No backend is configured for the channel, or the backend refused.
    #[error("Channel {channel} unavailable: {reason}")]
    Unavailable {
        channel: DeliveryChannel,
        reason: String,
    },

    #[error(transparent)]
    Webhook(#[from] webhook::WebhookError),

    #[error(transparent)]
    Email(#[from] email::EmailError),
}

// ---------------------------------------------------------------------------
// DeliveryDispatcher
// ---------------------------------------------------------------------------

/// Sends one item or one digest to a user over a channel.
///
/// Implementations must tolerate repeated calls for the same payload; see
/// [`DeliveryPayload::idempotency_key`].
#[async_trait]
pub trait DeliveryDispatcher: Send + Sync {
    async fn deliver(
        &self,
        user_id: DbId,
        channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), DispatchError>;
}

/// Call `dispatcher` with an upper bound on the wait. Expiry is a
/// [`DispatchError::Timeout`].
pub async fn deliver_with_timeout(
    dispatcher: &dyn DeliveryDispatcher,
    user_id: DbId,
    channel: DeliveryChannel,
    payload: &DeliveryPayload,
    timeout: Duration,
) -> Result<(), DispatchError> {
    match tokio::time::timeout(timeout, dispatcher.deliver(user_id, channel, payload)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(timeout)),
    }
}

// ---------------------------------------------------------------------------
// ChannelRouter
// ---------------------------------------------------------------------------

/// Routes each channel to the backend registered for it.
#[derive(Default, Clone)]
pub struct ChannelRouter {
    routes: HashMap<DeliveryChannel, Arc<dyn DeliveryDispatcher>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, channel: DeliveryChannel, backend: Arc<dyn DeliveryDispatcher>) -> Self {
        self.routes.insert(channel, backend);
        self
    }

    pub fn has_route(&self, channel: DeliveryChannel) -> bool {
        self.routes.contains_key(&channel)
    }
}

#[async_trait]
impl DeliveryDispatcher for ChannelRouter {
    async fn deliver(
        &self,
        user_id: DbId,
        channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), DispatchError> {
        match self.routes.get(&channel) {
            Some(backend) => backend.deliver(user_id, channel, payload).await,
            None => Err(DispatchError::Unavailable {
                channel,
                reason: "no delivery backend configured".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl DeliveryDispatcher for Counting {
        async fn deliver(
            &self,
            _user_id: DbId,
            _channel: DeliveryChannel,
            _payload: &DeliveryPayload,
        ) -> Result<(), DispatchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Stalled;

    #[async_trait]
    impl DeliveryDispatcher for Stalled {
        async fn deliver(
            &self,
            _user_id: DbId,
            _channel: DeliveryChannel,
            _payload: &DeliveryPayload,
        ) -> Result<(), DispatchError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn payload() -> DeliveryPayload {
        DeliveryPayload::Item(ItemPayload {
            item_id: 3,
            event: EventType::WorkUpdated,
            priority: Priority::Medium,
            source_type: "work".into(),
            source_id: 9,
            title: "Chapter 4 posted".into(),
            description: String::new(),
            action_url: "/works/9".into(),
            actor_name: "author".into(),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn router_dispatches_to_registered_channel() {
        let web = Arc::new(Counting(AtomicUsize::new(0)));
        let router = ChannelRouter::new().route(DeliveryChannel::Web, web.clone());

        router.deliver(1, DeliveryChannel::Web, &payload()).await.unwrap();
        assert_eq!(web.0.load(Ordering::SeqCst), 1);

        let err = router
            .deliver(1, DeliveryChannel::Email, &payload())
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Unavailable { channel: DeliveryChannel::Email, .. });
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_dispatch_times_out() {
        let err = deliver_with_timeout(
            &Stalled,
            1,
            DeliveryChannel::Push,
            &payload(),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert_matches!(err, DispatchError::Timeout(d) if d == Duration::from_secs(10));
    }

    #[test]
    fn idempotency_key_names_the_entity() {
        assert_eq!(payload().idempotency_key(), "item-3");
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["kind"], "item");
        assert_eq!(json["event"], "work_updated");
    }
}
