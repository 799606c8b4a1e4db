//! Repository for the `notification_digests` table.

use quill_core::digest::{state_machine, DigestStatus, DigestType};
use quill_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;
use crate::models::digest::{DigestClaim, NotificationDigest, NotificationDigestRow};
use crate::models::notification::{NotificationItem, NotificationItemRow};
use crate::repositories::lock_user;
use crate::repositories::notification_repo::COLUMNS as ITEM_COLUMNS;

/// Column list for `notification_digests` queries.
const COLUMNS: &str =
    "id, user_id, digest_type, item_ids, status, attempts, window_start, created_at, sent_at";

/// Provides digest claim, completion, and lookup.
pub struct DigestRepo;

impl DigestRepo {
    /// Enclose the user's undelivered, unenclosed items in a new pending
    /// digest under the per-user lock.
    ///
    /// See [`DigestStore::claim`](crate::store::DigestStore::claim) for the
    /// selection rules.
    pub async fn claim(
        pool: &PgPool,
        user_id: DbId,
        digest_type: DigestType,
        first_run_since: Timestamp,
        now: Timestamp,
    ) -> Result<DigestClaim, StoreError> {
        let mut tx = pool.begin().await?;
        lock_user(&mut tx, user_id).await?;

        let query = format!(
            "SELECT {COLUMNS} FROM notification_digests \
             WHERE user_id = $1 AND status = $2 \
             ORDER BY id \
             LIMIT 1"
        );
        let pending = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(user_id)
            .bind(DigestStatus::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = pending {
            return Ok(DigestClaim::InFlight(row.try_into()?));
        }

        let previous: Option<Timestamp> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM notification_digests WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let lower_bound = match previous {
            Some(_) => None,
            None => Some(first_run_since),
        };

        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM notification_items \
             WHERE user_id = $1 AND is_delivered = false AND digest_id IS NULL \
               AND created_at <= $2 \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
             ORDER BY created_at, id \
             FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(user_id)
            .bind(now)
            .bind(lower_bound)
            .fetch_all(&mut *tx)
            .await?;
        if rows.is_empty() {
            return Ok(DigestClaim::Empty);
        }
        let mut items = rows
            .into_iter()
            .map(NotificationItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let item_ids: Vec<DbId> = items.iter().map(|i| i.id).collect();

        let query = format!(
            "INSERT INTO notification_digests \
                (user_id, digest_type, item_ids, status, window_start, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(user_id)
            .bind(digest_type.as_str())
            .bind(&item_ids)
            .bind(DigestStatus::Pending.as_str())
            .bind(previous.unwrap_or(first_run_since))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
        let digest = NotificationDigest::try_from(row)?;

        sqlx::query("UPDATE notification_items SET digest_id = $1 WHERE id = ANY($2)")
            .bind(digest.id)
            .bind(&item_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        for item in &mut items {
            item.digest_id = Some(digest.id);
        }
        Ok(DigestClaim::Created { digest, items })
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<NotificationDigest>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM notification_digests WHERE id = $1");
        sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(NotificationDigest::try_from)
            .transpose()
    }

    /// The digest's enclosed items, oldest first.
    pub async fn items(pool: &PgPool, digest_id: DbId) -> Result<Vec<NotificationItem>, StoreError> {
        if Self::find_by_id(pool, digest_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "notification_digest",
                id: digest_id,
            });
        }
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM notification_items \
             WHERE digest_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, NotificationItemRow>(&query)
            .bind(digest_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationItem::try_from).collect()
    }

    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<NotificationDigest>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_digests \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationDigest::try_from).collect()
    }

    /// Every pending digest, oldest first.
    pub async fn list_unresolved(pool: &PgPool) -> Result<Vec<NotificationDigest>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_digests \
             WHERE status = $1 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(DigestStatus::Pending.as_str())
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(NotificationDigest::try_from).collect()
    }

    pub async fn last_sent_at(pool: &PgPool, user_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        let sent_at: Option<Timestamp> = sqlx::query_scalar(
            "SELECT MAX(sent_at) FROM notification_digests WHERE user_id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(DigestStatus::Sent.as_str())
        .fetch_one(pool)
        .await?;
        Ok(sent_at)
    }

    /// Mark the digest sent and every enclosed item delivered in one
    /// transaction.
    pub async fn mark_sent(
        pool: &PgPool,
        id: DbId,
        at: Timestamp,
    ) -> Result<NotificationDigest, StoreError> {
        let mut tx = pool.begin().await?;
        let current = Self::lock_for_update(&mut tx, id).await?;
        state_machine::validate_transition(current.status, DigestStatus::Sent)
            .map_err(StoreError::InvalidTransition)?;

        let query = format!(
            "UPDATE notification_digests SET status = $2, sent_at = $3 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(id)
            .bind(DigestStatus::Sent.as_str())
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE notification_items \
             SET is_delivered = true, delivered_at = $2 \
             WHERE digest_id = $1 AND is_delivered = false",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Count a failed dispatch, moving the digest to `failed` once
    /// `max_attempts` is reached.
    pub async fn record_failure(
        pool: &PgPool,
        id: DbId,
        max_attempts: i32,
    ) -> Result<NotificationDigest, StoreError> {
        let mut tx = pool.begin().await?;
        let current = Self::lock_for_update(&mut tx, id).await?;
        if current.status != DigestStatus::Pending {
            return Err(StoreError::InvalidTransition(format!(
                "cannot record a failed dispatch for a {} digest",
                current.status
            )));
        }

        let attempts = current.attempts + 1;
        let status = if attempts >= max_attempts {
            DigestStatus::Failed
        } else {
            DigestStatus::Pending
        };
        let digest = Self::set_status(&mut tx, id, status, attempts).await?;
        tx.commit().await?;
        Ok(digest)
    }

    /// Move a failed digest back to pending with a fresh attempt budget.
    pub async fn requeue(pool: &PgPool, id: DbId) -> Result<NotificationDigest, StoreError> {
        let mut tx = pool.begin().await?;
        let current = Self::lock_for_update(&mut tx, id).await?;
        state_machine::validate_transition(current.status, DigestStatus::Pending)
            .map_err(StoreError::InvalidTransition)?;
        lock_user(&mut tx, current.user_id).await?;

        let other_pending: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM notification_digests WHERE user_id = $1 AND status = $2 LIMIT 1",
        )
        .bind(current.user_id)
        .bind(DigestStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if other_pending.is_some() {
            return Err(StoreError::InvalidTransition(format!(
                "user {} already has a pending digest",
                current.user_id
            )));
        }

        let digest = Self::set_status(&mut tx, id, DigestStatus::Pending, 0).await?;
        tx.commit().await?;
        Ok(digest)
    }

    async fn lock_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<NotificationDigest, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM notification_digests WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "notification_digest",
                id,
            })?;
        row.try_into()
    }

    async fn set_status(
        conn: &mut PgConnection,
        id: DbId,
        status: DigestStatus,
        attempts: i32,
    ) -> Result<NotificationDigest, StoreError> {
        let query = format!(
            "UPDATE notification_digests SET status = $2, attempts = $3 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationDigestRow>(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(attempts)
            .fetch_one(conn)
            .await?
            .try_into()
    }
}
