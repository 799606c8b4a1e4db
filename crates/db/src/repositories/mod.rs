//! Repository layer: one zero-sized struct per table with static async
//! methods taking a `&PgPool`.

use quill_core::types::DbId;
use sqlx::PgConnection;

pub mod digest_repo;
pub mod notification_repo;
pub mod preference_repo;
pub mod subscription_repo;

pub use digest_repo::DigestRepo;
pub use notification_repo::NotificationRepo;
pub use preference_repo::PreferenceRepo;
pub use subscription_repo::SubscriptionRepo;

/// Take the per-user transaction lock serializing admission and digest
/// claims for `user_id`. Released at commit or rollback.
pub(crate) async fn lock_user(conn: &mut PgConnection, user_id: DbId) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}
