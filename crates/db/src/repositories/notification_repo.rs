//! Repository for the `notification_items` table.

use quill_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::notification::{
    rate_limit_window, Admission, AdmissionLimits, NewNotificationItem, NotificationItem,
    NotificationItemRow,
};
use crate::repositories::lock_user;

/// Column list for `notification_items` queries.
pub(crate) const COLUMNS: &str = "id, user_id, event, channel, priority, subscription_id, \
    source_id, source_type, title, description, action_url, actor_id, actor_name, \
    extra_data, digest_id, delivery_attempts, is_read, read_at, is_delivered, \
    delivered_at, created_at";

/// Provides CRUD operations for notification items.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Rate-limit check, dedup check, and insert in one transaction.
    ///
    /// The per-user advisory lock serializes concurrent admissions for the
    /// same user, so two callers can never both take the last free slot.
    pub async fn admit(
        pool: &PgPool,
        item: &NewNotificationItem,
        limits: AdmissionLimits,
    ) -> Result<Admission, StoreError> {
        let mut tx = pool.begin().await?;
        lock_user(&mut tx, item.user_id).await?;

        // One fan-out (same source, event, and created_at) is one slot.
        let (recent_count, joins_fan_out): (i64, bool) = sqlx::query_as(
            "SELECT COUNT(DISTINCT (source_id, event, created_at)), \
                    COALESCE(BOOL_OR(source_id = $3 AND event = $4 AND created_at = $5), false) \
             FROM notification_items \
             WHERE user_id = $1 AND created_at > $2",
        )
        .bind(item.user_id)
        .bind(item.created_at - rate_limit_window())
        .bind(item.source_id)
        .bind(item.event.as_str())
        .bind(item.created_at)
        .fetch_one(&mut *tx)
        .await?;
        if !joins_fan_out && limits.rate_limit_exceeded(recent_count) {
            return Ok(Admission::RateLimited { recent_count });
        }

        let existing: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM notification_items \
             WHERE user_id = $1 AND source_id = $2 AND event = $3 AND channel = $4 \
               AND created_at > $5 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1",
        )
        .bind(item.user_id)
        .bind(item.source_id)
        .bind(item.event.as_str())
        .bind(item.channel.as_str())
        .bind(item.created_at - limits.dedup_window)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing_id) = existing {
            return Ok(Admission::Duplicate { existing_id });
        }

        let query = format!(
            "INSERT INTO notification_items \
                (user_id, event, channel, priority, subscription_id, source_id, source_type, \
                 title, description, action_url, actor_id, actor_name, extra_data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(item.user_id)
            .bind(item.event.as_str())
            .bind(item.channel.as_str())
            .bind(item.priority.as_str())
            .bind(item.subscription_id)
            .bind(item.source_id)
            .bind(&item.source_type)
            .bind(&item.title)
            .bind(&item.description)
            .bind(&item.action_url)
            .bind(item.actor_id)
            .bind(&item.actor_name)
            .bind(&item.extra_data)
            .bind(item.created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Admission::Created(row.try_into()?))
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<NotificationItem>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM notification_items WHERE id = $1");
        sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(NotificationItem::try_from)
            .transpose()
    }

    /// List items for a user, newest first.
    ///
    /// When `unread_only` is `true`, only items with `is_read = false` are
    /// returned.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        let filter = if unread_only {
            "AND is_read = false"
        } else {
            ""
        };
        let query = format!(
            "SELECT {COLUMNS} FROM notification_items \
             WHERE user_id = $1 {filter} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(user_id)
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationItem::try_from).collect()
    }

    pub async fn unread_count(pool: &PgPool, user_id: DbId) -> Result<i64, StoreError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_items WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Mark a single item as read.
    ///
    /// Returns `true` if an unread item owned by `user_id` was updated.
    pub async fn mark_read(
        pool: &PgPool,
        id: DbId,
        user_id: DbId,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE notification_items \
             SET is_read = true, read_at = $3 \
             WHERE id = $1 AND user_id = $2 AND is_read = false",
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns the number of items that were marked read.
    pub async fn mark_all_read(pool: &PgPool, user_id: DbId, at: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE notification_items \
             SET is_read = true, read_at = $2 \
             WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_delivered(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE notification_items \
             SET is_delivered = true, delivered_at = $2 \
             WHERE id = $1 AND is_delivered = false",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns the new attempt count.
    pub async fn record_delivery_failure(pool: &PgPool, id: DbId) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE notification_items \
             SET delivery_attempts = delivery_attempts + 1 \
             WHERE id = $1 \
             RETURNING delivery_attempts",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        attempts.ok_or(StoreError::NotFound {
            entity: "notification_item",
            id,
        })
    }

    pub async fn delete(pool: &PgPool, id: DbId, user_id: DbId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notification_items WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Items awaiting individual delivery for one user, oldest first.
    pub async fn list_pending_deliveries(
        pool: &PgPool,
        user_id: DbId,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<NotificationItem>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_items \
             WHERE user_id = $1 AND is_delivered = false AND digest_id IS NULL \
               AND delivery_attempts < $2 AND created_at <= $3 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(user_id)
            .bind(max_attempts)
            .bind(created_before)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationItem::try_from).collect()
    }

    pub async fn users_with_pending_deliveries(
        pool: &PgPool,
        max_attempts: i32,
        created_before: Timestamp,
    ) -> Result<Vec<DbId>, StoreError> {
        let users = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM notification_items \
             WHERE is_delivered = false AND digest_id IS NULL \
               AND delivery_attempts < $1 AND created_at <= $2 \
             ORDER BY user_id",
        )
        .bind(max_attempts)
        .bind(created_before)
        .fetch_all(pool)
        .await?;
        Ok(users)
    }
}
