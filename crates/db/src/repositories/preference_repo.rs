//! Repository for the `notification_preferences` table.

use quill_core::preferences::NotificationPreferences;
use quill_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::preference::NotificationPreferencesRow;

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "user_id, email_enabled, web_enabled, push_enabled, \
    quiet_hours_start, quiet_hours_end, timezone, event_preferences, \
    enable_batching, batch_frequency, max_notifications_per_hour, \
    min_secs_between_similar, created_at, updated_at";

/// Provides CRUD operations for per-user notification preferences.
pub struct PreferenceRepo;

impl PreferenceRepo {
    pub async fn find_by_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<NotificationPreferences>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM notification_preferences WHERE user_id = $1");
        sqlx::query_as::<_, NotificationPreferencesRow>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .map(NotificationPreferences::try_from)
            .transpose()
    }

    /// Insert or replace the user's preferences in a single round-trip.
    pub async fn upsert(
        pool: &PgPool,
        prefs: &NotificationPreferences,
    ) -> Result<NotificationPreferences, StoreError> {
        let query = format!(
            "INSERT INTO notification_preferences \
                (user_id, email_enabled, web_enabled, push_enabled, quiet_hours_start, \
                 quiet_hours_end, timezone, event_preferences, enable_batching, \
                 batch_frequency, max_notifications_per_hour, min_secs_between_similar) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (user_id) DO UPDATE SET \
                email_enabled = EXCLUDED.email_enabled, \
                web_enabled = EXCLUDED.web_enabled, \
                push_enabled = EXCLUDED.push_enabled, \
                quiet_hours_start = EXCLUDED.quiet_hours_start, \
                quiet_hours_end = EXCLUDED.quiet_hours_end, \
                timezone = EXCLUDED.timezone, \
                event_preferences = EXCLUDED.event_preferences, \
                enable_batching = EXCLUDED.enable_batching, \
                batch_frequency = EXCLUDED.batch_frequency, \
                max_notifications_per_hour = EXCLUDED.max_notifications_per_hour, \
                min_secs_between_similar = EXCLUDED.min_secs_between_similar, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationPreferencesRow>(&query)
            .bind(prefs.user_id)
            .bind(prefs.email_enabled)
            .bind(prefs.web_enabled)
            .bind(prefs.push_enabled)
            .bind(prefs.quiet_hours_start)
            .bind(prefs.quiet_hours_end)
            .bind(&prefs.timezone)
            .bind(Json(&prefs.event_preferences))
            .bind(prefs.enable_batching)
            .bind(prefs.batch_frequency.as_str())
            .bind(prefs.max_notifications_per_hour)
            .bind(prefs.min_secs_between_similar)
            .fetch_one(pool)
            .await?;
        row.try_into()
    }

    pub async fn delete(pool: &PgPool, user_id: DbId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every user with batching enabled.
    pub async fn list_batching(pool: &PgPool) -> Result<Vec<NotificationPreferences>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE enable_batching = true \
             ORDER BY user_id"
        );
        let rows = sqlx::query_as::<_, NotificationPreferencesRow>(&query)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationPreferences::try_from).collect()
    }
}
