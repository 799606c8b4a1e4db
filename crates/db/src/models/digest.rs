//! Notification digest entity model.

use quill_core::digest::{DigestStatus, DigestType};
use quill_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;
use crate::models::notification::NotificationItem;

/// A batch of one user's items delivered together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationDigest {
    pub id: DbId,
    pub user_id: DbId,
    pub digest_type: DigestType,
    /// Enclosed items, ordered by creation time ascending.
    pub item_ids: Vec<DbId>,
    pub status: DigestStatus,
    /// Failed dispatch attempts so far.
    pub attempts: i32,
    /// Start of the selection window the items were drawn from.
    pub window_start: Timestamp,
    pub created_at: Timestamp,
    pub sent_at: Option<Timestamp>,
}

/// Outcome of [`DigestStore::claim`](crate::store::DigestStore::claim).
#[derive(Debug, Clone, PartialEq)]
pub enum DigestClaim {
    /// A new pending digest enclosing these items.
    Created {
        digest: NotificationDigest,
        items: Vec<NotificationItem>,
    },
    /// The user already has an unresolved digest; nothing was created.
    InFlight(NotificationDigest),
    /// No eligible items in the window; nothing was created.
    Empty,
}

/// A row from the `notification_digests` table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationDigestRow {
    pub id: DbId,
    pub user_id: DbId,
    pub digest_type: String,
    pub item_ids: Vec<DbId>,
    pub status: String,
    pub attempts: i32,
    pub window_start: Timestamp,
    pub created_at: Timestamp,
    pub sent_at: Option<Timestamp>,
}

impl TryFrom<NotificationDigestRow> for NotificationDigest {
    type Error = StoreError;

    fn try_from(row: NotificationDigestRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: String| StoreError::corrupt("notification_digest", id, e);
        Ok(Self {
            digest_type: row.digest_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            id: row.id,
            user_id: row.user_id,
            item_ids: row.item_ids,
            attempts: row.attempts,
            window_start: row.window_start,
            created_at: row.created_at,
            sent_at: row.sent_at,
        })
    }
}
