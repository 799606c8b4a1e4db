//! PostgreSQL-backed implementation of the store contracts.

use async_trait::async_trait;
use quill_core::digest::DigestType;
use quill_core::event_types::EventType;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};
use validator::Validate;

use crate::error::StoreError;
use crate::models::digest::{DigestClaim, NotificationDigest};
use crate::models::notification::{
    Admission, AdmissionLimits, NewNotificationItem, NotificationItem,
};
use crate::models::subscription::{Subscription, UpdateSubscription};
use crate::repositories::{DigestRepo, NotificationRepo, PreferenceRepo, SubscriptionRepo};
use crate::store::{DigestStore, NotificationStore, PreferenceStore, SubscriptionStore};
use crate::DbPool;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn put(&self, input: NewSubscription) -> Result<Subscription, StoreError> {
        input.validate()?;
        SubscriptionRepo::put(&self.pool, &input).await
    }

    async fn get(&self, id: DbId) -> Result<Option<Subscription>, StoreError> {
        SubscriptionRepo::find_by_id(&self.pool, id).await
    }

    async fn update(
        &self,
        id: DbId,
        update: UpdateSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        update.validate()?;
        SubscriptionRepo::update(&self.pool, id, &update).await
    }

    async fn set_active(&self, id: DbId, active: bool) -> Result<bool, StoreError> {
        SubscriptionRepo::set_active(&self.pool, id, active).await
    }

    async fn delete(&self, id: DbId) -> Result<bool, StoreError> {
        SubscriptionRepo::delete(&self.pool, id).await
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Subscription>, StoreError> {
        SubscriptionRepo::list_for_user(&self.pool, user_id).await
    }

    async fn list_by_target(
        &self,
        kind: SubscriptionKind,
        target_ids: &[DbId],
        event: EventType,
    ) -> Result<Vec<Subscription>, StoreError> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        SubscriptionRepo::list_by_target(&self.pool, kind, target_ids, event).await
    }

    async fn touch_notified(&self, id: DbId, at: Timestamp) -> Result<(), StoreError> {
        SubscriptionRepo::touch_notified(&self.pool, id, at).await
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreferences>, StoreError> {
        PreferenceRepo::find_by_user(&self.pool, user_id).await
    }

    async fn put(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, StoreError> {
        prefs.validate()?;
        PreferenceRepo::upsert(&self.pool, &prefs).await
    }

    async fn delete(&self, user_id: DbId) -> Result<bool, StoreError> {
        PreferenceRepo::delete(&self.pool, user_id).await
    }

    async fn list_batching(&self) -> Result<Vec<NotificationPreferences>, StoreError> {
        PreferenceRepo::list_batching(&self.pool).await
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn admit(
        &self,
        item: NewNotificationItem,
        limits: AdmissionLimits,
    ) -> Result<Admission, StoreError> {
        NotificationRepo::admit(&self.pool, &item, limits).await
    }

    async fn get(&self, id: DbId) -> Result<Option<NotificationItem>, StoreError> {
        NotificationRepo::find_by_id(&self.pool, id).await
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        NotificationRepo::list_for_user(&self.pool, user_id, unread_only, limit, offset).await
    }

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError> {
        NotificationRepo::unread_count(&self.pool, user_id).await
    }

    async fn mark_read(&self, id: DbId, user_id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        NotificationRepo::mark_read(&self.pool, id, user_id, at).await
    }

    async fn mark_all_read(&self, user_id: DbId, at: Timestamp) -> Result<u64, StoreError> {
        NotificationRepo::mark_all_read(&self.pool, user_id, at).await
    }

    async fn mark_delivered(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        NotificationRepo::mark_delivered(&self.pool, id, at).await
    }

    async fn record_delivery_failure(&self, id: DbId) -> Result<i32, StoreError> {
        NotificationRepo::record_delivery_failure(&self.pool, id).await
    }

    async fn delete(&self, id: DbId, user_id: DbId) -> Result<bool, StoreError> {
        NotificationRepo::delete(&self.pool, id, user_id).await
    }

    async fn list_pending_deliveries(
        &self,
        user_id: DbId,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        NotificationRepo::list_pending_deliveries(&self.pool, user_id, max_attempts, created_before)
            .await
    }

    async fn users_with_pending_deliveries(
        &self,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<DbId>, StoreError> {
        NotificationRepo::users_with_pending_deliveries(&self.pool, max_attempts, created_before)
            .await
    }
}

#[async_trait]
impl DigestStore for PgStore {
    async fn claim(
        &self,
        user_id: DbId,
        digest_type: DigestType,
        first_run_since: Timestamp,
        now: Timestamp,
    ) -> Result<DigestClaim, StoreError> {
        DigestRepo::claim(&self.pool, user_id, digest_type, first_run_since, now).await
    }

    async fn get(&self, id: DbId) -> Result<Option<NotificationDigest>, StoreError> {
        DigestRepo::find_by_id(&self.pool, id).await
    }

    async fn items(&self, digest_id: DbId) -> Result<Vec<NotificationItem>, StoreError> {
        DigestRepo::items(&self.pool, digest_id).await
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<NotificationDigest>, StoreError> {
        DigestRepo::list_for_user(&self.pool, user_id).await
    }

    async fn list_unresolved(&self) -> Result<Vec<NotificationDigest>, StoreError> {
        DigestRepo::list_unresolved(&self.pool).await
    }

    async fn last_sent_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        DigestRepo::last_sent_at(&self.pool, user_id).await
    }

    async fn mark_sent(&self, id: DbId, at: Timestamp) -> Result<NotificationDigest, StoreError> {
        DigestRepo::mark_sent(&self.pool, id, at).await
    }

    async fn record_failure(
        &self,
        id: DbId,
        max_attempts: i32,
    ) -> Result<NotificationDigest, StoreError> {
        DigestRepo::record_failure(&self.pool, id, max_attempts).await
    }

    async fn requeue(&self, id: DbId) -> Result<NotificationDigest, StoreError> {
        DigestRepo::requeue(&self.pool, id).await
    }
}
