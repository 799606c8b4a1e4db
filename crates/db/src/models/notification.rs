//! Notification item entity models and DTOs.

use chrono::TimeDelta;
use quill_core::channels::DeliveryChannel;
use quill_core::event_types::{EventType, Priority};
use quill_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;

/// One notification for one user on one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationItem {
    pub id: DbId,
    pub user_id: DbId,
    pub event: EventType,
    pub channel: DeliveryChannel,
    pub priority: Priority,
    pub subscription_id: Option<DbId>,
    pub source_id: DbId,
    pub source_type: String,
    pub title: String,
    pub description: String,
    pub action_url: String,
    pub actor_id: Option<DbId>,
    pub actor_name: String,
    pub extra_data: serde_json::Value,
    /// Set once the item is enclosed in a digest.
    pub digest_id: Option<DbId>,
    pub delivery_attempts: i32,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub is_delivered: bool,
    pub delivered_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// DTO for creating a notification item.
#[derive(Debug, Clone)]
pub struct NewNotificationItem {
    pub user_id: DbId,
    pub event: EventType,
    pub channel: DeliveryChannel,
    pub priority: Priority,
    pub subscription_id: Option<DbId>,
    pub source_id: DbId,
    pub source_type: String,
    pub title: String,
    pub description: String,
    pub action_url: String,
    pub actor_id: Option<DbId>,
    pub actor_name: String,
    pub extra_data: serde_json::Value,
    pub created_at: Timestamp,
}

/// Trailing window for the hourly cap.
pub fn rate_limit_window() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Limits checked atomically with item creation.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionLimits {
    /// Maximum notifications per user in the trailing hour, counting one
    /// per channel fan-out; `0` is unlimited.
    pub max_per_hour: i32,
    /// An item for the same user, source, event type, and channel created
    /// less than this long ago makes the new one a duplicate.
    pub dedup_window: TimeDelta,
}

/// Outcome of [`NotificationStore::admit`](crate::store::NotificationStore::admit).
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Created(NotificationItem),
    RateLimited { recent_count: i64 },
    Duplicate { existing_id: DbId },
}

impl AdmissionLimits {
    pub(crate) fn rate_limit_exceeded(&self, recent_count: i64) -> bool {
        self.max_per_hour > 0 && recent_count >= i64::from(self.max_per_hour)
    }
}

/// A row from the `notification_items` table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationItemRow {
    pub id: DbId,
    pub user_id: DbId,
    pub event: String,
    pub channel: String,
    pub priority: String,
    pub subscription_id: Option<DbId>,
    pub source_id: DbId,
    pub source_type: String,
    pub title: String,
    pub description: String,
    pub action_url: String,
    pub actor_id: Option<DbId>,
    pub actor_name: String,
    pub extra_data: serde_json::Value,
    pub digest_id: Option<DbId>,
    pub delivery_attempts: i32,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub is_delivered: bool,
    pub delivered_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TryFrom<NotificationItemRow> for NotificationItem {
    type Error = StoreError;

    fn try_from(row: NotificationItemRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: String| StoreError::corrupt("notification_item", id, e);
        Ok(Self {
            event: row.event.parse().map_err(corrupt)?,
            channel: row.channel.parse().map_err(corrupt)?,
            priority: row.priority.parse().map_err(corrupt)?,
            id: row.id,
            user_id: row.user_id,
            subscription_id: row.subscription_id,
            source_id: row.source_id,
            source_type: row.source_type,
            title: row.title,
            description: row.description,
            action_url: row.action_url,
            actor_id: row.actor_id,
            actor_name: row.actor_name,
            extra_data: row.extra_data,
            digest_id: row.digest_id,
            delivery_attempts: row.delivery_attempts,
            is_read: row.is_read,
            read_at: row.read_at,
            is_delivered: row.is_delivered,
            delivered_at: row.delivered_at,
            created_at: row.created_at,
        })
    }
}
