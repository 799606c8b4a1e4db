//! Repository for the `subscriptions` table.

use quill_core::event_types::EventType;
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::subscription::{event_names, Subscription, SubscriptionRow, UpdateSubscription};

/// Column list for `subscriptions` queries.
const COLUMNS: &str = "id, user_id, kind, target_id, target_name, events, \
    filter_ratings, filter_tags, filter_completed, min_word_count, max_word_count, \
    is_active, last_notified_at, created_at, updated_at";

/// Provides CRUD operations for subscriptions.
pub struct SubscriptionRepo;

impl SubscriptionRepo {
    /// Insert or refresh the subscription keyed by `(user_id, kind, target_id)`.
    ///
    /// A conflicting row gets the new name, events, and filters and is
    /// reactivated.
    pub async fn put(pool: &PgPool, input: &NewSubscription) -> Result<Subscription, StoreError> {
        let query = format!(
            "INSERT INTO subscriptions \
                (user_id, kind, target_id, target_name, events, filter_ratings, filter_tags, \
                 filter_completed, min_word_count, max_word_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (user_id, kind, target_id) DO UPDATE SET \
                target_name = EXCLUDED.target_name, \
                events = EXCLUDED.events, \
                filter_ratings = EXCLUDED.filter_ratings, \
                filter_tags = EXCLUDED.filter_tags, \
                filter_completed = EXCLUDED.filter_completed, \
                min_word_count = EXCLUDED.min_word_count, \
                max_word_count = EXCLUDED.max_word_count, \
                is_active = true, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(input.user_id)
            .bind(input.kind.as_str())
            .bind(input.target_id)
            .bind(&input.target_name)
            .bind(event_names(&input.normalized_events()))
            .bind(&input.filters.ratings)
            .bind(&input.filters.tags)
            .bind(input.filters.completed)
            .bind(input.filters.min_word_count)
            .bind(input.filters.max_word_count)
            .fetch_one(pool)
            .await?;
        row.try_into()
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Subscription>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM subscriptions WHERE id = $1");
        sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    /// Apply a partial update. `None` fields keep their stored value; a
    /// present `filters` replaces all five filter columns.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        update: &UpdateSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        let events = update.events.as_ref().map(|events| {
            let mut events = events.clone();
            events.sort();
            events.dedup();
            event_names(&events)
        });
        let filters = update.filters.clone().unwrap_or_default();

        let query = format!(
            "UPDATE subscriptions SET \
                target_name = COALESCE($2, target_name), \
                events = COALESCE($3, events), \
                filter_ratings = CASE WHEN $4 THEN $5 ELSE filter_ratings END, \
                filter_tags = CASE WHEN $4 THEN $6 ELSE filter_tags END, \
                filter_completed = CASE WHEN $4 THEN $7 ELSE filter_completed END, \
                min_word_count = CASE WHEN $4 THEN $8 ELSE min_word_count END, \
                max_word_count = CASE WHEN $4 THEN $9 ELSE max_word_count END, \
                is_active = COALESCE($10, is_active), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(id)
            .bind(update.target_name.as_deref())
            .bind(events)
            .bind(update.filters.is_some())
            .bind(&filters.ratings)
            .bind(&filters.tags)
            .bind(filters.completed)
            .bind(filters.min_word_count)
            .bind(filters.max_word_count)
            .bind(update.is_active)
            .fetch_optional(pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    /// Returns `true` if the row existed.
    pub async fn set_active(pool: &PgPool, id: DbId, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_user(pool: &PgPool, user_id: DbId) -> Result<Vec<Subscription>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM subscriptions \
             WHERE user_id = $1 \
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// Active subscriptions of `kind` on any of `target_ids` that include
    /// `event`. Rows that fail to map are logged and skipped.
    pub async fn list_by_target(
        pool: &PgPool,
        kind: SubscriptionKind,
        target_ids: &[DbId],
        event: EventType,
    ) -> Result<Vec<Subscription>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM subscriptions \
             WHERE is_active = true AND kind = $1 AND target_id = ANY($2) AND $3 = ANY(events) \
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(kind.as_str())
            .bind(target_ids.to_vec())
            .bind(event.as_str())
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match Subscription::try_from(row) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable subscription row");
                    None
                }
            })
            .collect())
    }

    pub async fn touch_notified(pool: &PgPool, id: DbId, at: Timestamp) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE subscriptions \
             SET last_notified_at = GREATEST(COALESCE(last_notified_at, $2), $2) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
