#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, TimeZone, Utc};
use quill_core::channels::DeliveryChannel;
use quill_core::event_types::EventType;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};
use quill_db::models::notification::NotificationItem;
use quill_db::models::subscription::Subscription;
use quill_db::{MemoryStore, Stores};
use quill_events::delivery::{DeliveryDispatcher, DeliveryPayload, DispatchError};
use quill_events::{DigestScheduler, EngineConfig, NotificationEngine, NotificationEvent};

/// Monday 2026-03-02 12:00 UTC.
pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub fn minutes(m: i64) -> TimeDelta {
    TimeDelta::minutes(m)
}

// ---------------------------------------------------------------------------
// RecordingDispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Delivery {
    pub user_id: DbId,
    pub channel: DeliveryChannel,
    pub payload: DeliveryPayload,
}

/// Records every successful delivery; can be switched to fail or stall.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Delivery>>,
    fail: AtomicBool,
    stall: AtomicBool,
}

impl RecordingDispatcher {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Delivery> {
        self.sent.lock().unwrap().clone()
    }

    pub fn digests(&self) -> Vec<Delivery> {
        self.sent()
            .into_iter()
            .filter(|d| matches!(d.payload, DeliveryPayload::Digest(_)))
            .collect()
    }
}

#[async_trait]
impl DeliveryDispatcher for RecordingDispatcher {
    async fn deliver(
        &self,
        user_id: DbId,
        channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), DispatchError> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable {
                channel,
                reason: "gateway down".into(),
            });
        }
        self.sent.lock().unwrap().push(Delivery {
            user_id,
            channel,
            payload: payload.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub stores: Stores,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub engine: Arc<NotificationEngine>,
    pub scheduler: DigestScheduler,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            dispatch_timeout: Duration::from_millis(200),
            max_delivery_attempts: 3,
            digest_check_interval: Duration::from_secs(60),
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let stores = Stores::from_backend(Arc::new(MemoryStore::new()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = Arc::new(NotificationEngine::new(
            stores.clone(),
            dispatcher.clone(),
            config.clone(),
        ));
        let scheduler = DigestScheduler::new(stores.clone(), dispatcher.clone(), config.clone());
        Self {
            stores,
            dispatcher,
            engine,
            scheduler,
            config,
        }
    }

    pub async fn subscribe(
        &self,
        user_id: DbId,
        kind: SubscriptionKind,
        target_id: DbId,
        events: &[EventType],
    ) -> Subscription {
        self.stores
            .subscriptions
            .put(NewSubscription::new(user_id, kind, target_id, events.to_vec()))
            .await
            .unwrap()
    }

    pub async fn subscribe_with(&self, input: NewSubscription) -> Subscription {
        self.stores.subscriptions.put(input).await.unwrap()
    }

    pub async fn set_preferences(&self, prefs: NotificationPreferences) {
        self.stores.preferences.put(prefs).await.unwrap();
    }

    /// Defaults with the given tweak applied and stored.
    pub async fn prefs(&self, user_id: DbId, tweak: impl FnOnce(&mut NotificationPreferences)) {
        let mut prefs = NotificationPreferences::defaults(user_id);
        tweak(&mut prefs);
        self.set_preferences(prefs).await;
    }

    pub async fn items(&self, user_id: DbId) -> Vec<NotificationItem> {
        let mut items = self
            .stores
            .notifications
            .list_for_user(user_id, false, 1000, 0)
            .await
            .unwrap();
        items.sort_by_key(|i| (i.created_at, i.id));
        items
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A chapter update on `work_id` written by author 7.
pub fn work_updated(work_id: DbId) -> NotificationEvent {
    NotificationEvent::new(EventType::WorkUpdated, "work", work_id, format!("Work {work_id}: new chapter"))
        .with_actor(7, "author")
        .with_action_url(format!("/works/{work_id}"))
}
