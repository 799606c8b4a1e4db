//! Subscription entity model and DTOs.

use quill_core::event_types::EventType;
use quill_core::subscription::{SubscriptionFilters, SubscriptionKind};
use quill_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::error::StoreError;

/// A user's standing interest in a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: SubscriptionKind,
    pub target_id: DbId,
    pub target_name: String,
    pub events: Vec<EventType>,
    pub filters: SubscriptionFilters,
    pub is_active: bool,
    pub last_notified_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    pub fn wants(&self, event: EventType) -> bool {
        self.events.contains(&event)
    }
}

/// DTO for a partial subscription update. `filters` replaces the whole
/// filter set when present.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSubscription {
    pub target_name: Option<String>,
    #[validate(length(min = 1, message = "a subscription needs at least one event type"))]
    pub events: Option<Vec<EventType>>,
    #[validate(nested)]
    pub filters: Option<SubscriptionFilters>,
    pub is_active: Option<bool>,
}

/// A row from the `subscriptions` table.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: String,
    pub target_id: DbId,
    pub target_name: String,
    pub events: Vec<String>,
    pub filter_ratings: Vec<String>,
    pub filter_tags: Vec<String>,
    pub filter_completed: Option<bool>,
    pub min_word_count: Option<i64>,
    pub max_word_count: Option<i64>,
    pub is_active: bool,
    pub last_notified_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse()
            .map_err(|e: String| StoreError::corrupt("subscription", row.id, e))?;
        let events = row
            .events
            .iter()
            .map(|e| e.parse::<EventType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::corrupt("subscription", row.id, e))?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            kind,
            target_id: row.target_id,
            target_name: row.target_name,
            events,
            filters: SubscriptionFilters {
                ratings: row.filter_ratings,
                tags: row.filter_tags,
                completed: row.filter_completed,
                min_word_count: row.min_word_count,
                max_word_count: row.max_word_count,
            },
            is_active: row.is_active,
            last_notified_at: row.last_notified_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Event names as stored in the `events TEXT[]` column.
pub(crate) fn event_names(events: &[EventType]) -> Vec<String> {
    events.iter().map(|e| e.as_str().to_string()).collect()
}
