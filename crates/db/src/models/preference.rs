//! Notification preference row model.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use quill_core::event_types::EventType;
use quill_core::preferences::{EventChannelPreference, NotificationPreferences};
use quill_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationPreferencesRow {
    pub user_id: DbId,
    pub email_enabled: bool,
    pub web_enabled: bool,
    pub push_enabled: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub timezone: String,
    pub event_preferences: Json<BTreeMap<EventType, EventChannelPreference>>,
    pub enable_batching: bool,
    pub batch_frequency: String,
    pub max_notifications_per_hour: i32,
    pub min_secs_between_similar: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<NotificationPreferencesRow> for NotificationPreferences {
    type Error = StoreError;

    fn try_from(row: NotificationPreferencesRow) -> Result<Self, Self::Error> {
        let batch_frequency = row
            .batch_frequency
            .parse()
            .map_err(|e: String| StoreError::corrupt("notification_preferences", row.user_id, e))?;

        Ok(Self {
            user_id: row.user_id,
            email_enabled: row.email_enabled,
            web_enabled: row.web_enabled,
            push_enabled: row.push_enabled,
            quiet_hours_start: row.quiet_hours_start,
            quiet_hours_end: row.quiet_hours_end,
            timezone: row.timezone,
            event_preferences: row.event_preferences.0,
            enable_batching: row.enable_batching,
            batch_frequency,
            max_notifications_per_hour: row.max_notifications_per_hour,
            min_secs_between_similar: row.min_secs_between_similar,
        })
    }
}
