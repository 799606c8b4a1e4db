//! In-process store for tests and database-less runs.
//!
//! All state sits behind one async mutex, so every trait method is atomic
//! with respect to every other. That covers the per-user atomicity the
//! contracts in [`crate::store`] ask for.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use quill_core::digest::{state_machine, DigestStatus, DigestType};
use quill_core::event_types::EventType;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};
use tokio::sync::Mutex;
use validator::Validate;

use crate::error::StoreError;
use crate::models::digest::{DigestClaim, NotificationDigest};
use crate::models::notification::{
    rate_limit_window, Admission, AdmissionLimits, NewNotificationItem, NotificationItem,
};
use crate::models::subscription::{Subscription, UpdateSubscription};
use crate::store::{DigestStore, NotificationStore, PreferenceStore, SubscriptionStore};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: DbId,
    subscriptions: BTreeMap<DbId, Subscription>,
    preferences: BTreeMap<DbId, NotificationPreferences>,
    items: BTreeMap<DbId, NotificationItem>,
    digests: BTreeMap<DbId, NotificationDigest>,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn digest_mut(&mut self, id: DbId) -> Result<&mut NotificationDigest, StoreError> {
        self.digests.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "notification_digest",
            id,
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_events(events: &[EventType]) -> Vec<EventType> {
    let mut events = events.to_vec();
    events.sort();
    events.dedup();
    events
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn put(&self, input: NewSubscription) -> Result<Subscription, StoreError> {
        input.validate()?;
        let now = Utc::now();
        let events = input.normalized_events();
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.subscriptions.values_mut().find(|s| {
            s.user_id == input.user_id && s.kind == input.kind && s.target_id == input.target_id
        }) {
            existing.target_name = input.target_name;
            existing.events = events;
            existing.filters = input.filters;
            existing.is_active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = inner.next_id();
        let subscription = Subscription {
            id,
            user_id: input.user_id,
            kind: input.kind,
            target_id: input.target_id,
            target_name: input.target_name,
            events,
            filters: input.filters,
            is_active: true,
            last_notified_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.subscriptions.insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn get(&self, id: DbId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.inner.lock().await.subscriptions.get(&id).cloned())
    }

    async fn update(
        &self,
        id: DbId,
        update: UpdateSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        update.validate()?;
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.target_name {
            sub.target_name = name;
        }
        if let Some(events) = update.events {
            sub.events = sorted_events(&events);
        }
        if let Some(filters) = update.filters {
            sub.filters = filters;
        }
        if let Some(active) = update.is_active {
            sub.is_active = active;
        }
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }

    async fn set_active(&self, id: DbId, active: bool) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.is_active = active;
                sub.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.subscriptions.remove(&id).is_some())
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Subscription>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_target(
        &self,
        kind: SubscriptionKind,
        target_ids: &[DbId],
        event: EventType,
    ) -> Result<Vec<Subscription>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| {
                s.is_active
                    && s.kind == kind
                    && target_ids.contains(&s.target_id)
                    && s.wants(event)
            })
            .cloned()
            .collect())
    }

    async fn touch_notified(&self, id: DbId, at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.last_notified_at = Some(sub.last_notified_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreferences>, StoreError> {
        Ok(self.inner.lock().await.preferences.get(&user_id).cloned())
    }

    async fn put(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, StoreError> {
        prefs.validate()?;
        let mut inner = self.inner.lock().await;
        inner.preferences.insert(prefs.user_id, prefs.clone());
        Ok(prefs)
    }

    async fn delete(&self, user_id: DbId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.preferences.remove(&user_id).is_some())
    }

    async fn list_batching(&self) -> Result<Vec<NotificationPreferences>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .preferences
            .values()
            .filter(|p| p.enable_batching)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Notification items
// ---------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn admit(
        &self,
        item: NewNotificationItem,
        limits: AdmissionLimits,
    ) -> Result<Admission, StoreError> {
        let mut inner = self.inner.lock().await;

        let window_start = item.created_at - rate_limit_window();
        let recent: HashSet<(DbId, EventType, Timestamp)> = inner
            .items
            .values()
            .filter(|i| i.user_id == item.user_id && i.created_at > window_start)
            .map(|i| (i.source_id, i.event, i.created_at))
            .collect();
        let recent_count = recent.len() as i64;
        let joins_fan_out = recent.contains(&(item.source_id, item.event, item.created_at));
        if !joins_fan_out && limits.rate_limit_exceeded(recent_count) {
            return Ok(Admission::RateLimited { recent_count });
        }

        let dedup_start = item.created_at - limits.dedup_window;
        let similar = inner
            .items
            .values()
            .filter(|i| {
                i.user_id == item.user_id
                    && i.source_id == item.source_id
                    && i.event == item.event
                    && i.channel == item.channel
                    && i.created_at > dedup_start
            })
            .max_by_key(|i| (i.created_at, i.id));
        if let Some(existing) = similar {
            return Ok(Admission::Duplicate {
                existing_id: existing.id,
            });
        }

        let id = inner.next_id();
        let created = NotificationItem {
            id,
            user_id: item.user_id,
            event: item.event,
            channel: item.channel,
            priority: item.priority,
            subscription_id: item.subscription_id,
            source_id: item.source_id,
            source_type: item.source_type,
            title: item.title,
            description: item.description,
            action_url: item.action_url,
            actor_id: item.actor_id,
            actor_name: item.actor_name,
            extra_data: item.extra_data,
            digest_id: None,
            delivery_attempts: 0,
            is_read: false,
            read_at: None,
            is_delivered: false,
            delivered_at: None,
            created_at: item.created_at,
        };
        inner.items.insert(id, created.clone());
        Ok(Admission::Created(created))
    }

    async fn get(&self, id: DbId) -> Result<Option<NotificationItem>, StoreError> {
        Ok(self.inner.lock().await.items.get(&id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        let inner = self.inner.lock().await;
        let mut items: Vec<NotificationItem> = inner
            .items
            .values()
            .filter(|i| i.user_id == user_id && !(unread_only && i.is_read))
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(items
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .values()
            .filter(|i| i.user_id == user_id && !i.is_read)
            .count() as i64)
    }

    async fn mark_read(&self, id: DbId, user_id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.items.get_mut(&id) {
            Some(item) if item.user_id == user_id && !item.is_read => {
                item.is_read = true;
                item.read_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: DbId, at: Timestamp) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut updated = 0;
        for item in inner
            .items
            .values_mut()
            .filter(|i| i.user_id == user_id && !i.is_read)
        {
            item.is_read = true;
            item.read_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn mark_delivered(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.items.get_mut(&id) {
            Some(item) if !item.is_delivered => {
                item.is_delivered = true;
                item.delivered_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_delivery_failure(&self, id: DbId) -> Result<i32, StoreError> {
        let mut inner = self.inner.lock().await;
        let item = inner.items.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "notification_item",
            id,
        })?;
        item.delivery_attempts += 1;
        Ok(item.delivery_attempts)
    }

    async fn delete(&self, id: DbId, user_id: DbId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.items.get(&id).is_some_and(|i| i.user_id == user_id) {
            inner.items.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_pending_deliveries(
        &self,
        user_id: DbId,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        let inner = self.inner.lock().await;
        let mut items: Vec<NotificationItem> = inner
            .items
            .values()
            .filter(|i| i.user_id == user_id && is_pending_delivery(i, max_attempts, created_before))
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn users_with_pending_deliveries(
        &self,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<DbId>, StoreError> {
        let inner = self.inner.lock().await;
        let users: BTreeSet<DbId> = inner
            .items
            .values()
            .filter(|i| is_pending_delivery(i, max_attempts, created_before))
            .map(|i| i.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }
}

fn is_pending_delivery(item: &NotificationItem, max_attempts: i32, created_before: Timestamp) -> bool {
    !item.is_delivered
        && item.digest_id.is_none()
        && item.delivery_attempts < max_attempts
        && item.created_at <= created_before
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

#[async_trait]
impl DigestStore for MemoryStore {
    async fn claim(
        &self,
        user_id: DbId,
        digest_type: DigestType,
        first_run_since: Timestamp,
        now: Timestamp,
    ) -> Result<DigestClaim, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(pending) = inner
            .digests
            .values()
            .find(|d| d.user_id == user_id && d.status == DigestStatus::Pending)
        {
            return Ok(DigestClaim::InFlight(pending.clone()));
        }

        let previous = inner
            .digests
            .values()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.created_at)
            .max();
        let lower_bound = match previous {
            Some(_) => None,
            None => Some(first_run_since),
        };

        let mut items: Vec<NotificationItem> = inner
            .items
            .values()
            .filter(|i| {
                i.user_id == user_id
                    && !i.is_delivered
                    && i.digest_id.is_none()
                    && i.created_at <= now
                    && lower_bound.map_or(true, |since| i.created_at >= since)
            })
            .cloned()
            .collect();
        if items.is_empty() {
            return Ok(DigestClaim::Empty);
        }
        items.sort_by_key(|i| (i.created_at, i.id));

        let id = inner.next_id();
        for item in &mut items {
            item.digest_id = Some(id);
            if let Some(stored) = inner.items.get_mut(&item.id) {
                stored.digest_id = Some(id);
            }
        }

        let digest = NotificationDigest {
            id,
            user_id,
            digest_type,
            item_ids: items.iter().map(|i| i.id).collect(),
            status: DigestStatus::Pending,
            attempts: 0,
            window_start: previous.unwrap_or(first_run_since),
            created_at: now,
            sent_at: None,
        };
        inner.digests.insert(id, digest.clone());
        Ok(DigestClaim::Created { digest, items })
    }

    async fn get(&self, id: DbId) -> Result<Option<NotificationDigest>, StoreError> {
        Ok(self.inner.lock().await.digests.get(&id).cloned())
    }

    async fn items(&self, digest_id: DbId) -> Result<Vec<NotificationItem>, StoreError> {
        let mut inner = self.inner.lock().await;
        let item_ids = inner.digest_mut(digest_id)?.item_ids.clone();
        let mut items: Vec<NotificationItem> = item_ids
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<NotificationDigest>, StoreError> {
        let inner = self.inner.lock().await;
        let mut digests: Vec<NotificationDigest> = inner
            .digests
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        digests.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(digests)
    }

    async fn list_unresolved(&self) -> Result<Vec<NotificationDigest>, StoreError> {
        let inner = self.inner.lock().await;
        let mut digests: Vec<NotificationDigest> = inner
            .digests
            .values()
            .filter(|d| d.status == DigestStatus::Pending)
            .cloned()
            .collect();
        digests.sort_by_key(|d| (d.created_at, d.id));
        Ok(digests)
    }

    async fn last_sent_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .digests
            .values()
            .filter(|d| d.user_id == user_id && d.status == DigestStatus::Sent)
            .filter_map(|d| d.sent_at)
            .max())
    }

    async fn mark_sent(&self, id: DbId, at: Timestamp) -> Result<NotificationDigest, StoreError> {
        let mut inner = self.inner.lock().await;
        let digest = inner.digest_mut(id)?;
        state_machine::validate_transition(digest.status, DigestStatus::Sent)
            .map_err(StoreError::InvalidTransition)?;
        digest.status = DigestStatus::Sent;
        digest.sent_at = Some(at);
        let digest = digest.clone();

        for item_id in &digest.item_ids {
            if let Some(item) = inner.items.get_mut(item_id) {
                if !item.is_delivered {
                    item.is_delivered = true;
                    item.delivered_at = Some(at);
                }
            }
        }
        Ok(digest)
    }

    async fn record_failure(
        &self,
        id: DbId,
        max_attempts: i32,
    ) -> Result<NotificationDigest, StoreError> {
        let mut inner = self.inner.lock().await;
        let digest = inner.digest_mut(id)?;
        if digest.status != DigestStatus::Pending {
            return Err(StoreError::InvalidTransition(format!(
                "cannot record a failed dispatch for a {} digest",
                digest.status
            )));
        }
        digest.attempts += 1;
        if digest.attempts >= max_attempts {
            digest.status = DigestStatus::Failed;
        }
        Ok(digest.clone())
    }

    async fn requeue(&self, id: DbId) -> Result<NotificationDigest, StoreError> {
        let mut inner = self.inner.lock().await;
        let digest = inner.digest_mut(id)?;
        state_machine::validate_transition(digest.status, DigestStatus::Pending)
            .map_err(StoreError::InvalidTransition)?;
        let user_id = digest.user_id;
        if inner
            .digests
            .values()
            .any(|d| d.user_id == user_id && d.status == DigestStatus::Pending)
        {
            return Err(StoreError::InvalidTransition(format!(
                "user {user_id} already has a pending digest"
            )));
        }
        let digest = inner.digest_mut(id)?;
        digest.status = DigestStatus::Pending;
        digest.attempts = 0;
        Ok(digest.clone())
    }
}
