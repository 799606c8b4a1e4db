//! Storage contracts the engine and scheduler depend on.
//!
//! Every check-then-act sequence that must be atomic per user (admission,
//! digest claim, digest completion) is a single trait method, so each
//! implementation can pick its own locking strategy.

use std::sync::Arc;

use async_trait::async_trait;
use quill_core::digest::DigestType;
use quill_core::event_types::EventType;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::models::digest::{DigestClaim, NotificationDigest};
use crate::models::notification::{
    Admission, AdmissionLimits, NewNotificationItem, NotificationItem,
};
use crate::models::subscription::{Subscription, UpdateSubscription};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Idempotent upsert keyed by `(user_id, kind, target_id)`.
    ///
    /// Re-subscribing replaces the event set, filters, and name of the
    /// existing row and reactivates it; it never creates a second row.
    async fn put(&self, input: NewSubscription) -> Result<Subscription, StoreError>;

    async fn get(&self, id: DbId) -> Result<Option<Subscription>, StoreError>;

    /// Apply a partial update. Returns `None` when the row does not exist.
    async fn update(
        &self,
        id: DbId,
        update: UpdateSubscription,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Returns `true` if the row existed.
    async fn set_active(&self, id: DbId, active: bool) -> Result<bool, StoreError>;

    async fn delete(&self, id: DbId) -> Result<bool, StoreError>;

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Subscription>, StoreError>;

    /// Active subscriptions of `kind` on any of `target_ids` whose event set
    /// contains `event`, ordered by id.
    ///
    /// Rows that cannot be mapped to a [`Subscription`] are logged and
    /// skipped.
    async fn list_by_target(
        &self,
        kind: SubscriptionKind,
        target_ids: &[DbId],
        event: EventType,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn touch_notified(&self, id: DbId, at: Timestamp) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Stored preferences, or `None` when the user has no row.
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreferences>, StoreError>;

    /// Create or replace the user's preferences.
    async fn put(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, StoreError>;

    async fn delete(&self, user_id: DbId) -> Result<bool, StoreError>;

    /// Every user with batching enabled, ordered by user id.
    async fn list_batching(&self) -> Result<Vec<NotificationPreferences>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Rate-limit check, dedup check, and insert as one atomic step per user.
    ///
    /// The rate limit counts the user's notifications created in the
    /// trailing hour before `item.created_at`, across all channels. Items
    /// sharing source, event type, and `created_at` are one notification
    /// fanned out to several channels and take a single slot; a later
    /// channel of an already admitted fan-out is never rate limited. The
    /// dedup check looks
    /// for an item with the same user, source, event type, and channel
    /// created within `limits.dedup_window`.
    async fn admit(
        &self,
        item: NewNotificationItem,
        limits: AdmissionLimits,
    ) -> Result<Admission, StoreError>;

    async fn get(&self, id: DbId) -> Result<Option<NotificationItem>, StoreError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationItem>, StoreError>;

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError>;

    /// Returns `true` if an unread item owned by `user_id` was updated.
    async fn mark_read(&self, id: DbId, user_id: DbId, at: Timestamp) -> Result<bool, StoreError>;

    /// Returns the number of items marked read.
    async fn mark_all_read(&self, user_id: DbId, at: Timestamp) -> Result<u64, StoreError>;

    /// Returns `true` if an undelivered item was updated.
    async fn mark_delivered(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError>;

    /// Increment the item's delivery attempt counter, returning the new count.
    async fn record_delivery_failure(&self, id: DbId) -> Result<i32, StoreError>;

    async fn delete(&self, id: DbId, user_id: DbId) -> Result<bool, StoreError>;

    /// Undelivered items outside any digest with fewer than `max_attempts`
    /// failed deliveries, created no later than `created_before`, oldest
    /// first.
    async fn list_pending_deliveries(
        &self,
        user_id: DbId,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<NotificationItem>, StoreError>;

    /// Users that have at least one item [`list_pending_deliveries`] would
    /// return, ordered by user id.
    ///
    /// [`list_pending_deliveries`]: NotificationStore::list_pending_deliveries
    async fn users_with_pending_deliveries(
        &self,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<DbId>, StoreError>;
}

#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Select the user's digest candidates and enclose them in a new pending
    /// digest, holding the user's lock for the whole step.
    ///
    /// Candidates are undelivered items not enclosed in any digest and
    /// created no later than `now`. For a user's first digest only items
    /// created at or after `first_run_since` qualify. Returns
    /// [`DigestClaim::InFlight`] without creating anything while the user
    /// has a pending digest.
    async fn claim(
        &self,
        user_id: DbId,
        digest_type: DigestType,
        first_run_since: Timestamp,
        now: Timestamp,
    ) -> Result<DigestClaim, StoreError>;

    async fn get(&self, id: DbId) -> Result<Option<NotificationDigest>, StoreError>;

    /// The digest's items ordered by creation time ascending.
    async fn items(&self, digest_id: DbId) -> Result<Vec<NotificationItem>, StoreError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<NotificationDigest>, StoreError>;

    /// Every pending digest, oldest first.
    async fn list_unresolved(&self) -> Result<Vec<NotificationDigest>, StoreError>;

    async fn last_sent_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError>;

    /// Transition `pending -> sent` and mark every enclosed item delivered,
    /// all in one unit.
    async fn mark_sent(&self, id: DbId, at: Timestamp) -> Result<NotificationDigest, StoreError>;

    /// Count a failed dispatch. The digest stays pending until `max_attempts`
    /// failures, then moves to `failed`. Enclosed items are left untouched.
    async fn record_failure(
        &self,
        id: DbId,
        max_attempts: i32,
    ) -> Result<NotificationDigest, StoreError>;

    /// Transition `failed -> pending` with a fresh attempt budget.
    async fn requeue(&self, id: DbId) -> Result<NotificationDigest, StoreError>;
}

/// One handle per store contract.
///
/// The contracts share method names (`get`, `put`, `delete`), so callers
/// hold each one behind its own trait object rather than one combined type.
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub digests: Arc<dyn DigestStore>,
}

impl Stores {
    /// Split one backend implementing every contract into per-contract handles.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: SubscriptionStore + PreferenceStore + NotificationStore + DigestStore + 'static,
    {
        Self {
            subscriptions: backend.clone(),
            preferences: backend.clone(),
            notifications: backend.clone(),
            digests: backend,
        }
    }
}
